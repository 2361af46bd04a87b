//! Biographical metadata attached to a registered person.
//!
//! Every field is optional free text. Values are normalized on the way in:
//! surrounding whitespace is trimmed and blank values become `None`, so an
//! empty form field is never stored as an empty string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonMetadata {
    pub state: Option<String>,
    pub district: Option<String>,
    pub police_station: Option<String>,
    pub dd_date: Option<String>,
    pub place_of_missing: Option<String>,
    pub tracing_status: Option<String>,
    pub report_date: Option<String>,
    pub missing_from: Option<String>,
    pub reporting_date: Option<String>,
    pub year_of_birth: Option<String>,
    pub sex: Option<String>,
    pub religion: Option<String>,
    pub name: Option<String>,
    pub guardian_name: Option<String>,
    pub address: Option<String>,
    pub height: Option<String>,
    pub mobile_no: Option<String>,
    pub other_details: Option<String>,
}

impl PersonMetadata {
    /// Field names, in storage column order.
    pub const FIELDS: [&'static str; 18] = [
        "state",
        "district",
        "police_station",
        "dd_date",
        "place_of_missing",
        "tracing_status",
        "report_date",
        "missing_from",
        "reporting_date",
        "year_of_birth",
        "sex",
        "religion",
        "name",
        "guardian_name",
        "address",
        "height",
        "mobile_no",
        "other_details",
    ];

    /// Build metadata from `(field, value)` pairs, normalizing each value.
    /// Unknown field names are skipped.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut metadata = Self::default();
        for (field, value) in pairs {
            if !metadata.set(field, value) {
                tracing::debug!(field, "ignoring unknown metadata field");
            }
        }
        metadata
    }

    /// Set a field by name. Returns `false` if `field` is not a known column.
    pub fn set(&mut self, field: &str, value: &str) -> bool {
        match self.field_mut(field) {
            Some(slot) => {
                *slot = normalize(Some(value));
                true
            }
            None => false,
        }
    }

    /// Values in [`FIELDS`](Self::FIELDS) order.
    pub fn values(&self) -> [Option<&str>; 18] {
        [
            self.state.as_deref(),
            self.district.as_deref(),
            self.police_station.as_deref(),
            self.dd_date.as_deref(),
            self.place_of_missing.as_deref(),
            self.tracing_status.as_deref(),
            self.report_date.as_deref(),
            self.missing_from.as_deref(),
            self.reporting_date.as_deref(),
            self.year_of_birth.as_deref(),
            self.sex.as_deref(),
            self.religion.as_deref(),
            self.name.as_deref(),
            self.guardian_name.as_deref(),
            self.address.as_deref(),
            self.height.as_deref(),
            self.mobile_no.as_deref(),
            self.other_details.as_deref(),
        ]
    }

    /// Return a copy with every field trimmed and blanks turned into `None`.
    pub fn normalized(mut self) -> Self {
        for field in Self::FIELDS {
            if let Some(slot) = self.field_mut(field) {
                *slot = normalize(slot.take().as_deref());
            }
        }
        self
    }

    /// Lowercased, filesystem-safe form of `name`, used to name saved face
    /// images. `None` when the name is absent or blank.
    pub fn name_key(&self) -> Option<String> {
        let name = self.name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(
            name.to_lowercase()
                .chars()
                .map(|c| match c {
                    'a'..='z' | '0'..='9' | '_' | '-' => c,
                    _ => '_',
                })
                .collect(),
        )
    }

    fn field_mut(&mut self, field: &str) -> Option<&mut Option<String>> {
        let slot = match field {
            "state" => &mut self.state,
            "district" => &mut self.district,
            "police_station" => &mut self.police_station,
            "dd_date" => &mut self.dd_date,
            "place_of_missing" => &mut self.place_of_missing,
            "tracing_status" => &mut self.tracing_status,
            "report_date" => &mut self.report_date,
            "missing_from" => &mut self.missing_from,
            "reporting_date" => &mut self.reporting_date,
            "year_of_birth" => &mut self.year_of_birth,
            "sex" => &mut self.sex,
            "religion" => &mut self.religion,
            "name" => &mut self.name,
            "guardian_name" => &mut self.guardian_name,
            "address" => &mut self.address,
            "height" => &mut self.height,
            "mobile_no" => &mut self.mobile_no,
            "other_details" => &mut self.other_details,
            _ => return None,
        };
        Some(slot)
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
