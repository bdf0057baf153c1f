//! Storefront markup. Update here when the site changes its class names.

use std::sync::LazyLock;

use regex::Regex;

use crate::extract::{Extractor, Field};

// ── Listing ──

pub const LOAD_MORE: &str = ".cardstack-nextcontent__button";
pub const MERCHANT_CARD: &str = "a.merchant-v2__link";

pub static MERCHANT_CARDS: LazyLock<Extractor> = LazyLock::new(|| {
    Extractor::new(MERCHANT_CARD, Field::own_attr("href", "href"))
        .unwrap()
        .field(Field::text("name", ".merchant-v2__name").unwrap())
});

// ── Merchant page ──

pub const DETAILS_BUTTON: &str = ".merchant-details__button";

pub const ABOUT_INFO: &str =
    ".merchant-details-about__info + .merchant-details-about__info .merchant-details-about__info-data";

pub static ABOUT_TEXTS: LazyLock<Extractor> =
    LazyLock::new(|| Extractor::new(ABOUT_INFO, Field::own_text("text")).unwrap());

pub const SCHEDULE_TAB: &str = "#marmita-tab1-1";
pub const SCHEDULE_PANEL: &str = ".merchant-details-schedule";

pub static SCHEDULE_DAYS: LazyLock<Extractor> = LazyLock::new(|| {
    Extractor::new(
        ".merchant-details-schedule__day",
        Field::text("day", ".merchant-details-schedule__day-title-text").unwrap(),
    )
    .unwrap()
    .field(Field::text("hours", ".merchant-details-schedule__day-schedule").unwrap())
});

static CNPJ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2})").unwrap());

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryText {
    /// Digits only, e.g. `11222333000144`.
    Found(String),
    Missing,
    Malformed(String),
}

/// Find the CNPJ line among the "about" texts and reduce it to digits.
pub fn registry_id(texts: &[String]) -> RegistryText {
    let Some(line) = texts.iter().find(|t| t.contains("CNPJ")) else {
        return RegistryText::Missing;
    };
    match CNPJ_RE.captures(line).and_then(|c| c.get(1)) {
        Some(m) => RegistryText::Found(m.as_str().chars().filter(char::is_ascii_digit).collect()),
        None => RegistryText::Malformed(line.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NOT_FOUND;

    #[test]
    fn merchant_cards_from_listing_markup() {
        let html = r#"
            <div class="merchant-list-v2">
              <a class="merchant-v2__link" href="/delivery/sao-paulo-sp/pizza-place/abc">
                <div class="merchant-v2__name">Pizza Place</div>
              </a>
              <a class="merchant-v2__link" href="/delivery/sao-paulo-sp/no-name/def">
                <div class="merchant-v2__info">4.8</div>
              </a>
              <a class="merchant-v2__link"><div class="merchant-v2__name">No Link</div></a>
            </div>"#;
        let cards = MERCHANT_CARDS.extract(html);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].get("name"), "Pizza Place");
        assert_eq!(cards[1].get("name"), NOT_FOUND);
    }

    #[test]
    fn about_texts_skip_the_first_info_block() {
        let html = r#"
            <div class="merchant-details-about">
              <div class="merchant-details-about__info">
                <p class="merchant-details-about__info-data">Rua A, 10</p>
              </div>
              <div class="merchant-details-about__info">
                <p class="merchant-details-about__info-data">Pizza Place LTDA</p>
                <p class="merchant-details-about__info-data">CNPJ: 11.222.333/0001-44</p>
              </div>
            </div>"#;
        let texts: Vec<String> = ABOUT_TEXTS.extract(html).into_iter().map(|r| r.key).collect();
        assert_eq!(texts, ["Pizza Place LTDA", "CNPJ: 11.222.333/0001-44"]);
        assert_eq!(registry_id(&texts), RegistryText::Found("11222333000144".into()));
    }

    #[test]
    fn registry_text_edge_cases() {
        assert_eq!(registry_id(&["Rua A".into()]), RegistryText::Missing);
        assert_eq!(
            registry_id(&["CNPJ: 1122233300014".into()]),
            RegistryText::Malformed("CNPJ: 1122233300014".into())
        );
    }

    #[test]
    fn schedule_rows() {
        let html = r#"
            <div class="merchant-details-schedule">
              <div class="merchant-details-schedule__day">
                <span class="merchant-details-schedule__day-title-text">Sábado</span>
                <span class="merchant-details-schedule__day-schedule">10:00 - 23:00</span>
              </div>
              <div class="merchant-details-schedule__day">
                <span class="merchant-details-schedule__day-schedule">orphan</span>
              </div>
            </div>"#;
        let rows = SCHEDULE_DAYS.extract(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "Sábado");
        assert_eq!(rows[0].get("hours"), "10:00 - 23:00");
    }
}
