//! Count table loading.
//!
//! Parses the three-column `entity,input,output` table produced by the
//! upstream count aggregation stage into an in-memory [`CountTable`].
//! A header row is optional: if the count fields of the first record do not
//! parse as non-negative integers, the record is treated as a header and
//! column roles are resolved by name where recognized, by position otherwise.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
    #[error("duplicate entity {id:?} at line {line}")]
    DuplicateEntity { id: String, line: u64 },
    #[error("failed to read count table")]
    Io(#[from] csv::Error),
}

/// Paired counts for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub input: u64,
    pub output: u64,
}

/// Ordered collection of `(entity, observation)` pairs, unique by entity.
#[derive(Debug, Clone, Default)]
pub struct CountTable {
    entities: Vec<String>,
    observations: Vec<Observation>,
}

/// Column roles within a record: (entity, input, output) indices.
type Roles = (usize, usize, usize);

impl CountTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let file = File::open(path.as_ref()).map_err(csv::Error::from)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entities = Vec::new();
        let mut observations = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut roles: Option<Roles> = None;

        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map(|p| p.line())
                .unwrap_or(idx as u64 + 1);

            if record.len() != 3 {
                return Err(TableError::MalformedRow {
                    line,
                    reason: format!("expected 3 columns, found {}", record.len()),
                });
            }

            let (entity_col, input_col, output_col) = match roles {
                Some(r) => r,
                None => {
                    // First record: a header is allowed, recognized by both
                    // count fields failing to parse. A single bad count in
                    // an otherwise numeric first row is a malformed row, not
                    // a header.
                    if record.iter().skip(1).all(|f| f.parse::<u64>().is_err()) {
                        roles = Some(resolve_roles(&record));
                        continue;
                    }
                    roles = Some((0, 1, 2));
                    (0, 1, 2)
                }
            };

            let id = record[entity_col].to_string();
            if id.is_empty() {
                return Err(TableError::MalformedRow {
                    line,
                    reason: "empty entity identifier".to_string(),
                });
            }
            let input = parse_count(&record[input_col], "input", line)?;
            let output = parse_count(&record[output_col], "output", line)?;

            if !seen.insert(id.clone()) {
                return Err(TableError::DuplicateEntity { id, line });
            }
            entities.push(id);
            observations.push(Observation { input, output });
        }

        Ok(CountTable {
            entities,
            observations,
        })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Observation)> + '_ {
        self.entities
            .iter()
            .map(String::as_str)
            .zip(self.observations.iter().copied())
    }

    /// Deterministic random subset of `k` rows, preserving input order.
    /// Returns a clone when `k` covers the whole table.
    pub fn subsample(&self, k: usize, seed: u64) -> Self {
        if k >= self.len() {
            return self.clone();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, self.len(), k).into_vec();
        picked.sort_unstable();
        CountTable {
            entities: picked.iter().map(|&i| self.entities[i].clone()).collect(),
            observations: picked.iter().map(|&i| self.observations[i]).collect(),
        }
    }
}

fn parse_count(field: &str, column: &str, line: u64) -> Result<u64, TableError> {
    field.parse::<u64>().map_err(|_| TableError::MalformedRow {
        line,
        reason: format!("{column} count {field:?} is not a non-negative integer"),
    })
}

/// Map header names onto column roles; positional when names are unrecognized.
fn resolve_roles(header: &csv::StringRecord) -> Roles {
    let mut entity = None;
    let mut input = None;
    let mut output = None;
    for (i, name) in header.iter().enumerate() {
        match name.to_ascii_lowercase().as_str() {
            "clone" | "entity" | "id" => entity = entity.or(Some(i)),
            "input" => input = input.or(Some(i)),
            "output" => output = output.or(Some(i)),
            _ => {}
        }
    }
    match (entity, input, output) {
        (Some(e), Some(i), Some(o)) => (e, i, o),
        _ => (0, 1, 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn load(text: &str) -> Result<CountTable, TableError> {
        CountTable::from_reader(text.as_bytes())
    }

    #[test]
    fn loads_headerless_table() {
        let table = load("a,10,20\nb,5,0\n").unwrap();
        assert_eq!(table.entities(), &["a".to_string(), "b".to_string()]);
        assert_eq!(
            table.observations(),
            &[
                Observation {
                    input: 10,
                    output: 20
                },
                Observation { input: 5, output: 0 },
            ]
        );
    }

    #[test]
    fn loads_table_with_named_header() {
        let table = load("output,clone,input\n20,a,10\n").unwrap();
        assert_eq!(table.entities(), &["a".to_string()]);
        assert_eq!(
            table.observations(),
            &[Observation {
                input: 10,
                output: 20
            }]
        );
    }

    #[test]
    fn unrecognized_header_falls_back_to_positions() {
        let table = load("name,before,after\na,10,20\n").unwrap();
        assert_eq!(
            table.observations(),
            &[Observation {
                input: 10,
                output: 20
            }]
        );
    }

    #[test]
    fn rejects_non_numeric_count_with_line() {
        let err = load("clone,input,output\na,10,20\nb,5,abc\n").unwrap_err();
        match err {
            TableError::MalformedRow { line, reason } => {
                assert_eq!(line, 3);
                assert!(reason.contains("abc"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_negative_count() {
        let err = load("a,10,20\nb,-5,1\n").unwrap_err();
        assert!(matches!(err, TableError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = load("a,10\n").unwrap_err();
        assert!(matches!(err, TableError::MalformedRow { line: 1, .. }));
    }

    #[test]
    fn rejects_duplicate_entity() {
        let err = load("a,10,20\nb,1,2\na,3,4\n").unwrap_err();
        match err {
            TableError::DuplicateEntity { id, .. } => assert_eq!(id, "a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn subsample_is_deterministic_and_ordered() {
        let table = load("a,1,1\nb,2,2\nc,3,3\nd,4,4\ne,5,5\n").unwrap();
        let s1 = table.subsample(3, 7);
        let s2 = table.subsample(3, 7);
        assert_eq!(s1.entities(), s2.entities());
        assert_eq!(s1.len(), 3);
        let positions: Vec<usize> = s1
            .entities()
            .iter()
            .map(|e| table.entities().iter().position(|t| t == e).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
