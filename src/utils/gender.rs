//! First-name based gender inference.

use crate::core::error::{AppError, Result};
use crate::core::models::Gender;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// Maps a first name to a gender label. Implementations must be pure.
pub trait GenderClassifier: Send + Sync {
    fn classify(&self, first_name: &str) -> Gender;
}

/// `name,gender` table shipped with the crate.
const BUNDLED_NAMES: &str = include_str!("../../data/first_names.csv");

#[derive(Debug, Deserialize)]
struct NameRow {
    name: String,
    gender: String,
}

/// Table-driven classifier over known first names.
///
/// Compound names are classified by their first segment; a name present in
/// both tables is `Unknown`.
#[derive(Debug, Clone, Default)]
pub struct NameTableClassifier {
    male: HashSet<String>,
    female: HashSet<String>,
}

impl NameTableClassifier {
    /// Classifier over the bundled name table.
    pub fn bundled() -> Self {
        let mut classifier = Self::default();
        if let Err(e) = classifier.extend_from_csv(BUNDLED_NAMES.as_bytes()) {
            tracing::error!(target: "pipeline", "Bundled name table could not be read: {}", e);
        }
        classifier
    }

    /// Bundled table extended with the rows of a `name,gender` CSV file.
    pub fn bundled_with_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut classifier = Self::bundled();
        let added = classifier.extend_from_csv(file).map_err(|e| {
            AppError::Config(format!("Invalid names file '{}': {}", path.display(), e))
        })?;
        tracing::info!(target: "config", "Loaded {} names from {}", added, path.display());
        Ok(classifier)
    }

    /// Reads `name,gender` rows (`m`/`male`, `f`/`female`). Unlabelled rows are skipped.
    pub fn extend_from_csv<R: Read>(&mut self, reader: R) -> std::result::Result<usize, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let mut added = 0;
        for row in reader.deserialize::<NameRow>() {
            let row = row?;
            let name = row.name.to_lowercase();
            if name.is_empty() {
                continue;
            }
            let table = match row.gender.to_lowercase().as_str() {
                "m" | "male" => &mut self.male,
                "f" | "female" => &mut self.female,
                other => {
                    tracing::debug!(target: "config", "Skipping name '{}' with gender '{}'", name, other);
                    continue;
                }
            };
            table.insert(name);
            added += 1;
        }
        Ok(added)
    }

    /// Adds names to the tables.
    pub fn with_names<I, S>(mut self, male: I, female: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.male
            .extend(male.into_iter().map(|s| s.as_ref().trim().to_lowercase()));
        self.female
            .extend(female.into_iter().map(|s| s.as_ref().trim().to_lowercase()));
        self
    }
}

impl GenderClassifier for NameTableClassifier {
    fn classify(&self, first_name: &str) -> Gender {
        let key = first_name
            .trim()
            .split(|c: char| c.is_whitespace() || c == '-' || c == '.')
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
            .to_lowercase();
        if key.is_empty() {
            return Gender::Unknown;
        }
        match (self.male.contains(&key), self.female.contains(&key)) {
            (true, false) => Gender::Male,
            (false, true) => Gender::Female,
            _ => Gender::Unknown,
        }
    }
}
