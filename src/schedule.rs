/// Opening-hours columns, one per weekday, keyed by the storefront's
/// Portuguese labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    pub fn from_label(label: &str) -> Option<Weekday> {
        match label.trim() {
            "Segunda-feira" => Some(Weekday::Mon),
            "Terça-feira" => Some(Weekday::Tue),
            "Quarta-feira" => Some(Weekday::Wed),
            "Quinta-feira" => Some(Weekday::Thu),
            "Sexta-feira" => Some(Weekday::Fri),
            "Sábado" => Some(Weekday::Sat),
            "Domingo" => Some(Weekday::Sun),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Weekday::Mon => "seg",
            Weekday::Tue => "ter",
            Weekday::Wed => "qua",
            Weekday::Thu => "qui",
            Weekday::Fri => "sex",
            Weekday::Sat => "sab",
            Weekday::Sun => "dom",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    days: [Option<String>; 7],
}

impl Schedule {
    /// Builds a schedule from (label, hours) rows. Unknown labels are dropped.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = (&'a str, &'a str)>) -> Schedule {
        let mut schedule = Schedule::default();
        for (label, hours) in rows {
            if let Some(day) = Weekday::from_label(label) {
                schedule.set(day, hours.to_string());
            }
        }
        schedule
    }

    pub fn set(&mut self, day: Weekday, hours: String) {
        self.days[day.index()] = Some(hours);
    }

    pub fn get(&self, day: Weekday) -> Option<&str> {
        self.days[day.index()].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Option::is_none)
    }

    /// Values in column order, `seg` through `dom`.
    pub fn slots(&self) -> [Option<&str>; 7] {
        let mut out = [None; 7];
        for (slot, day) in out.iter_mut().zip(&self.days) {
            *slot = day.as_deref();
        }
        out
    }
}
