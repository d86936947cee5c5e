use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::XenoError;

/// Stable identifier for one taxon, derived from its scientific name.
/// Namespaces cache filenames and audio output directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesKey(String);

impl SpeciesKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reverses the filename sanitization back into a display label.
    pub fn display_name(&self) -> String {
        self.0.replace('_', " ")
    }
}

impl fmt::Display for SpeciesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpeciesKey {
    type Err = XenoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(XenoError::InvalidSpeciesName(value.to_string()));
        }
        let sanitized: String = trimmed
            .chars()
            .map(|ch| match ch {
                ' ' => '_',
                '/' => '-',
                other => other,
            })
            .collect();
        Ok(Self(sanitized))
    }
}

/// One row of the input species list, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesQuery {
    key: SpeciesKey,
    genus: String,
    species: String,
    country: Option<String>,
}

impl SpeciesQuery {
    pub fn new(scientific_name: &str, country: Option<String>) -> Result<Self, XenoError> {
        let key: SpeciesKey = scientific_name.parse()?;
        let mut parts = scientific_name.split_whitespace();
        let genus = parts
            .next()
            .ok_or_else(|| XenoError::InvalidSpeciesName(scientific_name.to_string()))?
            .to_string();
        let species = parts.collect::<Vec<_>>().join(" ");
        Ok(Self {
            key,
            genus,
            species,
            country: country.filter(|c| !c.trim().is_empty()),
        })
    }

    pub fn key(&self) -> &SpeciesKey {
        &self.key
    }

    pub fn genus(&self) -> &str {
        &self.genus
    }

    pub fn scientific_name(&self) -> String {
        if self.species.is_empty() {
            self.genus.clone()
        } else {
            format!("{} {}", self.genus, self.species)
        }
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// Builds the API search string, e.g. `sp:"Cossypha caffra"+cnt:ZA`.
    /// Multi-word values are quoted; the geographic tag is joined with `+`.
    pub fn search_string(&self) -> String {
        let mut query = format!("sp:\"{}\"", self.scientific_name());
        if let Some(country) = &self.country {
            query.push_str(&format!("+cnt:{country}"));
        }
        query
    }
}
