//! Core domain model for the vacancy sheet sync.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "vacsync-core";

/// Spreadsheet column titles, in sheet order. A row is mapped positionally
/// against this schema; rows shorter than the schema map only the columns
/// they actually carry.
pub const COLUMN_TITLES: [&str; 15] = [
    "company_name",
    "company_short_description",
    "company_direction",
    "vacancy_name",
    "vacancy_description",
    "vacancy_requirements",
    "vacancy_working_conditions",
    "vacancy_salary",
    "vacancy_benefits",
    "vacancy_contacts",
    "company_website",
    "degree",
    "minimal_english_level",
    "working_time",
    "working_experience",
];

/// The fixed direction catalog, seeded once at first run. Order matters:
/// ids are assigned in catalog order.
pub const DIRECTION_NAMES: [&str; 23] = [
    "IT, комп'ютери, інтернет",
    "Адмiнiстрацiя, керівництво середньої ланки",
    "Будівництво, архітектура",
    "Бухгалтерія, аудит, секретаріат, діловодство, АГВ",
    "Готельно-ресторанний бізнес, туризм, сфера обслуговування",
    "Дизайн, творчість",
    "ЗМІ, видавництво, поліграфія",
    "Краса, фітнес, спорт",
    "Культура, музика, шоу-бізнес",
    "Логістика, склад, ЗЕД",
    "Маркетинг, реклама, PR, телекомунікації та зв'язок",
    "Медицина, фармацевтика",
    "Нерухомість",
    "Освіта, наука",
    "Охорона, безпека",
    "Продаж, закупівля",
    "Робочі спеціальності, виробництво",
    "Роздрібна торгівля",
    "Сільське господарство, агробізнес",
    "Транспорт, автобізнес",
    "Фінанси, банк",
    "Управління персоналом, HR",
    "Юриспруденція",
];

/// One row of the direction catalog as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Direction {
    pub id: i32,
    pub name: String,
}

/// Mapped but not yet persisted row: column title → raw cell text.
pub type MappedRow<'t> = BTreeMap<&'t str, String>;

/// Map one raw sheet row against the column-title schema by position.
///
/// Short rows map only the positions present; no padding, no fabricated
/// keys. An empty row has nothing to map and returns `None` so the caller
/// can log and move on.
pub fn map_row<'t>(cells: &[String], titles: &'t [&'t str]) -> Option<MappedRow<'t>> {
    if cells.is_empty() {
        return None;
    }
    Some(
        titles
            .iter()
            .zip(cells.iter())
            .map(|(title, cell)| (*title, cell.clone()))
            .collect(),
    )
}

/// Natural key used to detect duplicate vacancies. Narrower than the full
/// field set on purpose: non-identifying columns drift in spreadsheet text
/// without making the posting a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VacancyKey {
    pub company_name: String,
    pub vacancy_name: String,
    pub vacancy_description: String,
    pub vacancy_salary: String,
}

/// A vacancy staged for insertion. Ids are assigned by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVacancy {
    pub company_name: String,
    pub company_short_description: String,
    pub direction_id: i32,
    pub vacancy_name: String,
    pub vacancy_description: String,
    pub vacancy_requirements: String,
    pub vacancy_working_conditions: String,
    pub vacancy_salary: String,
    pub vacancy_benefits: String,
    pub vacancy_contacts: String,
    pub company_website: String,
    pub degree: String,
    pub minimal_english_level: String,
    pub working_time: String,
    pub working_experience: String,
    pub date_added: DateTime<Utc>,
}

impl NewVacancy {
    /// Build a vacancy from a mapped row with the direction already resolved.
    /// Columns absent from the row default to the empty string.
    pub fn from_mapped(row: &MappedRow<'_>, direction_id: i32, date_added: DateTime<Utc>) -> Self {
        let field = |name: &str| row.get(name).cloned().unwrap_or_default();
        Self {
            company_name: field("company_name"),
            company_short_description: field("company_short_description"),
            direction_id,
            vacancy_name: field("vacancy_name"),
            vacancy_description: field("vacancy_description"),
            vacancy_requirements: field("vacancy_requirements"),
            vacancy_working_conditions: field("vacancy_working_conditions"),
            vacancy_salary: field("vacancy_salary"),
            vacancy_benefits: field("vacancy_benefits"),
            vacancy_contacts: field("vacancy_contacts"),
            company_website: field("company_website"),
            degree: field("degree"),
            minimal_english_level: field("minimal_english_level"),
            working_time: field("working_time"),
            working_experience: field("working_experience"),
            date_added,
        }
    }

    pub fn key(&self) -> VacancyKey {
        VacancyKey {
            company_name: self.company_name.clone(),
            vacancy_name: self.vacancy_name.clone(),
            vacancy_description: self.vacancy_description.clone(),
            vacancy_salary: self.vacancy_salary.clone(),
        }
    }
}
