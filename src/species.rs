use camino::Utf8Path;
use serde::Deserialize;

use crate::domain::SpeciesQuery;
use crate::error::XenoError;

/// One row of the input species list. Column names follow the labels file
/// produced by the upstream tagging workflow.
#[derive(Debug, Deserialize)]
struct SpeciesRow {
    #[serde(default, rename = "birdId")]
    bird_id: String,
    #[serde(default, rename = "birdName")]
    bird_name: String,
    #[serde(default, rename = "scientificName")]
    scientific_name: String,
}

/// Reads the species list CSV. Rows without a scientific name cannot be
/// queried and are skipped with a warning.
pub fn read_species_list(
    path: &Utf8Path,
    country: Option<&str>,
) -> Result<Vec<SpeciesQuery>, XenoError> {
    let mut reader = csv::Reader::from_path(path.as_std_path())
        .map_err(|err| XenoError::SpeciesList(format!("{path}: {err}")))?;

    let mut queries = Vec::new();
    for result in reader.deserialize() {
        let row: SpeciesRow =
            result.map_err(|err| XenoError::SpeciesList(format!("{path}: {err}")))?;
        if row.scientific_name.trim().is_empty() {
            tracing::warn!(
                bird_id = %row.bird_id,
                bird_name = %row.bird_name,
                "skipping row with no scientific name"
            );
            continue;
        }
        queries.push(SpeciesQuery::new(
            &row.scientific_name,
            country.map(str::to_string),
        )?);
    }

    tracing::info!(count = queries.len(), list = %path, "loaded species list");
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn write_list(content: &str) -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("labels.csv")).unwrap();
        std::fs::write(path.as_std_path(), content).unwrap();
        (temp, path)
    }

    #[test]
    fn loads_rows_and_skips_blank_scientific_names() {
        let (_temp, path) = write_list(
            "birdId,birdName,scientificName\n\
             1,Cape Robin-Chat,Cossypha caffra\n\
             2,Mystery Bird,\n\
             3,Common Blackbird,Turdus merula\n",
        );

        let queries = read_species_list(&path, Some("ZA")).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].key().as_str(), "Cossypha_caffra");
        assert_eq!(queries[0].country(), Some("ZA"));
        assert_eq!(queries[1].scientific_name(), "Turdus merula");
    }

    #[test]
    fn tolerates_missing_optional_columns() {
        let (_temp, path) = write_list(
            "scientificName\n\
             Cossypha caffra\n",
        );
        let queries = read_species_list(&path, None).unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].country(), None);
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("absent.csv")).unwrap();
        let err = read_species_list(&path, None).unwrap_err();
        assert_matches!(err, XenoError::SpeciesList(_));
    }
}
