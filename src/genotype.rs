use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ALLELE_ALPHABET, UNKNOWN_ALLELE};
use crate::error::KiraError;

pub const ID_COLUMN: &str = "rsid";
pub const REQUIRED_COLUMNS: [&str; 3] = [ID_COLUMN, "allele1", "allele2"];
pub const ID_ALIASES: [&str; 6] = ["rs id", "rs_id", "snp id", "snp_id", "snp", "marker"];

/// Cell values read as "no data".
const MISSING_TOKENS: [&str; 6] = ["", "NA", "N/A", "NAN", "0", "-"];
const LOGGED_ROW_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Genotype {
    pub first: String,
    pub second: String,
}

impl Genotype {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    pub fn calls(&self) -> [&str; 2] {
        [self.first.as_str(), self.second.as_str()]
    }

    pub fn is_complete(&self) -> bool {
        self.first != UNKNOWN_ALLELE && self.second != UNKNOWN_ALLELE
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub rows_read: usize,
    pub skipped_missing_id: usize,
    pub rejected_invalid_alleles: usize,
    pub incomplete_calls: usize,
}

/// Patient genotypes keyed by lower-cased marker identifier. Read-only once
/// loaded.
#[derive(Debug, Clone, Default)]
pub struct GenotypeMap {
    calls: BTreeMap<String, Genotype>,
    stats: LoadStats,
}

impl GenotypeMap {
    pub fn from_calls<I, K>(calls: I) -> Self
    where
        I: IntoIterator<Item = (K, Genotype)>,
        K: AsRef<str>,
    {
        Self {
            calls: calls
                .into_iter()
                .map(|(id, genotype)| (normalize_id(id.as_ref()), genotype))
                .collect(),
            stats: LoadStats::default(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Genotype> {
        self.calls.get(&normalize_id(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Genotype)> {
        self.calls.iter().map(|(id, genotype)| (id.as_str(), genotype))
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    MISSING_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

fn is_valid_allele(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ALLELE_ALPHABET.contains(ch))
}

#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    id: usize,
    allele1: usize,
    allele2: usize,
}

/// Resolves header names case- and whitespace-insensitively, accepting the
/// identifier aliases.
fn resolve_columns(headers: &StringRecord) -> Result<ColumnIndex, KiraError> {
    let found: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let position = |name: &str| found.iter().position(|h| h == name);

    let id = position(ID_COLUMN).or_else(|| ID_ALIASES.iter().find_map(|alias| position(alias)));
    let allele1 = position(REQUIRED_COLUMNS[1]);
    let allele2 = position(REQUIRED_COLUMNS[2]);

    match (id, allele1, allele2) {
        (Some(id), Some(allele1), Some(allele2)) => Ok(ColumnIndex {
            id,
            allele1,
            allele2,
        }),
        _ => {
            let missing = [(ID_COLUMN, id), (REQUIRED_COLUMNS[1], allele1), (REQUIRED_COLUMNS[2], allele2)]
                .into_iter()
                .filter(|(_, index)| index.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            Err(KiraError::MissingColumns {
                required: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
                found,
                missing,
            })
        }
    }
}

/// Tab when the header line has one, comma otherwise.
fn sniff_delimiter(content: &str) -> Option<u8> {
    let header = content
        .lines()
        .map(str::trim_end)
        .find(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))?;
    Some(if header.contains('\t') { b'\t' } else { b',' })
}

pub struct GenotypeLoader;

impl GenotypeLoader {
    /// Loads a delimited genotype file, transparently gunzipping `.gz` paths.
    pub fn load(path: &Path) -> Result<GenotypeMap, KiraError> {
        info!(path = %path.display(), "loading patient genotypes");
        let read_error = |err: std::io::Error| KiraError::GenotypeRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        let mut file = File::open(path).map_err(read_error)?;
        let is_gzip = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        let mut bytes = Vec::new();
        if is_gzip {
            GzDecoder::new(file).read_to_end(&mut bytes).map_err(read_error)?;
        } else {
            file.read_to_end(&mut bytes).map_err(read_error)?;
        }
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<GenotypeMap, KiraError> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|err| KiraError::GenotypeParse(err.to_string()))?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    /// Missing required columns are fatal; bad rows are skipped and counted.
    pub fn parse(content: &str) -> Result<GenotypeMap, KiraError> {
        let Some(delimiter) = sniff_delimiter(content) else {
            warn!("genotype file has no header row");
            return Ok(GenotypeMap::default());
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(Trim::All)
            .from_reader(content.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| KiraError::GenotypeParse(err.to_string()))?
            .clone();
        let columns = resolve_columns(&headers)?;

        let mut map = GenotypeMap::default();
        let mut malformed = 0usize;
        for (index, record) in reader.records().enumerate() {
            let line = index + 2;
            map.stats.rows_read += 1;
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    if malformed < LOGGED_ROW_LIMIT {
                        warn!(line, error = %err, "unreadable genotype row");
                    }
                    malformed += 1;
                    map.stats.rejected_invalid_alleles += 1;
                    continue;
                }
            };

            let raw_id = record.get(columns.id).unwrap_or("");
            let id = normalize_id(raw_id);
            if is_missing(raw_id) || id == "nan" {
                if map.stats.skipped_missing_id < LOGGED_ROW_LIMIT {
                    warn!(line, rsid = raw_id, "skipping row without marker id");
                }
                map.stats.skipped_missing_id += 1;
                continue;
            }

            let allele = |column: usize| {
                record
                    .get(column)
                    .filter(|value| !is_missing(value))
                    .map(|value| value.trim().to_uppercase())
            };
            let (first, second) = (allele(columns.allele1), allele(columns.allele2));
            if first.is_none() || second.is_none() {
                debug!(line, rsid = %id, "incomplete allele calls");
                map.stats.incomplete_calls += 1;
            }
            let genotype = Genotype::new(
                first.unwrap_or_else(|| UNKNOWN_ALLELE.to_string()),
                second.unwrap_or_else(|| UNKNOWN_ALLELE.to_string()),
            );

            if !genotype.calls().iter().all(|call| is_valid_allele(call)) {
                if map.stats.rejected_invalid_alleles < LOGGED_ROW_LIMIT {
                    warn!(line, rsid = %id, genotype = %genotype, "skipping row with invalid alleles");
                }
                map.stats.rejected_invalid_alleles += 1;
                continue;
            }

            map.calls.insert(id, genotype);
        }

        if map.stats.skipped_missing_id > 0 {
            warn!(count = map.stats.skipped_missing_id, "rows skipped for missing marker id");
        }
        if map.stats.rejected_invalid_alleles > 0 {
            warn!(count = map.stats.rejected_invalid_alleles, "rows rejected");
        }
        if map.is_empty() {
            warn!("no genotypes loaded");
        } else {
            info!(genotypes = map.len(), "patient genotypes loaded");
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn alias_header_and_tab_delimiter() {
        let content = "# exported by vendor\n SNP ID \tChromosome\tAllele1\tAllele2\nRS1\t1\ta\tg\n";
        let map = GenotypeLoader::parse(content).unwrap();
        assert_eq!(map.get("rs1"), Some(&Genotype::new("A", "G")));
    }

    #[test]
    fn missing_alleles_become_unknown() {
        let content = "rsid,allele1,allele2\nrs1,A,\nrs2,0,-\nrs3,--,T\n";
        let map = GenotypeLoader::parse(content).unwrap();
        assert_eq!(map.get("rs1"), Some(&Genotype::new("A", "?")));
        assert_eq!(map.get("rs2"), Some(&Genotype::new("?", "?")));
        assert_eq!(map.get("rs3"), Some(&Genotype::new("--", "T")));
        assert_eq!(map.stats().incomplete_calls, 2);
    }

    #[test]
    fn rows_without_id_or_with_bad_alleles_are_dropped() {
        let content = "rsid,allele1,allele2\n,A,G\nNA,A,G\nrs2,X,G\nrs3,A,G\n";
        let map = GenotypeLoader::parse(content).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.stats().skipped_missing_id, 2);
        assert_eq!(map.stats().rejected_invalid_alleles, 1);
        assert_eq!(map.stats().rows_read, 4);
    }

    #[test]
    fn missing_columns_are_reported() {
        let err = GenotypeLoader::parse("marker,allele1\nrs1,A\n").unwrap_err();
        assert_matches!(err, KiraError::MissingColumns { ref missing, ref found, .. } => {
            assert_eq!(missing, &vec!["allele2".to_string()]);
            assert_eq!(found, &vec!["marker".to_string(), "allele1".to_string()]);
        });
    }

    #[test]
    fn empty_content_is_an_empty_map() {
        let map = GenotypeLoader::parse("# only comments\n\n").unwrap();
        assert!(map.is_empty());
    }
}
