use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Placeholder for any field the card did not provide.
pub const NOT_MENTIONED: &str = "NOT MENTIONED";

/// One normalized listing. Every field is always set; absence is `NOT_MENTIONED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "JobTitle")]
    pub title: String,
    #[serde(rename = "Company")]
    pub company: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "PostDate")]
    pub posted_at: String,
    #[serde(rename = "ExtractDate")]
    pub extracted_at: NaiveDate,
    #[serde(rename = "Summary")]
    pub summary: String,
    #[serde(rename = "Salary")]
    pub salary: String,
    #[serde(rename = "JobUrl")]
    pub source_url: String,
}

impl JobRecord {
    pub fn natural_key(&self) -> NaturalKey<'_> {
        NaturalKey {
            title: &self.title,
            company: &self.company,
            source_url: &self.source_url,
        }
    }
}

/// Identity of a listing for dedup. Other fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaturalKey<'a> {
    pub title: &'a str,
    pub company: &'a str,
    pub source_url: &'a str,
}

/// A committed record plus its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredJob {
    pub id: i64,
    #[serde(flatten)]
    pub record: JobRecord,
}
