//! # Summary-Statistics Reformatting
//!
//! Converts association results from different genotype-association tools
//! into the common six-column input expected by the PRS estimation tool
//! (PRS-CS): `CHR SNP A1 A2 <OR|BETA> P`.
//!
//! The converter is header-driven: it maps column names to indices once,
//! validates the set required by the declared format, then streams data
//! rows, skipping (with a warning) any row whose fields cannot be
//! resolved.

use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReformatError {
    #[error("IO error during reformatting: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown summary-statistics format '{0}'; expected plink_v1, plink_v2 or saige")]
    UnknownFormat(String),
    #[error("input has no effect size column; one of 'OR' or 'BETA' is required")]
    MissingEffectColumn,
    #[error("required column '{0}' not found in the input header")]
    MissingRequiredColumn(String),
    #[error("input file is empty")]
    EmptyInput,
}

/// Source format of the association results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumstatFormat {
    /// PLINK 1.x `--assoc`/`--logistic` output: `#CHROM`, `SNP`, `A1`, `A2`.
    PlinkV1,
    /// PLINK 2.x output: `#CHROM`, `ID`, `A1`, `REF`, `ALT`; the other
    /// allele is whichever of REF/ALT is not A1.
    PlinkV2,
    /// SAIGE output: `MarkerID` of the form `chr:pos_ref_alt`,
    /// `Allele1`/`Allele2`, `p.value`.
    Saige,
}

impl FromStr for SumstatFormat {
    type Err = ReformatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plink_v1" => Ok(SumstatFormat::PlinkV1),
            "plink_v2" => Ok(SumstatFormat::PlinkV2),
            "saige" | "SAIGE" => Ok(SumstatFormat::Saige),
            other => Err(ReformatError::UnknownFormat(other.to_string())),
        }
    }
}

impl SumstatFormat {
    fn required_columns(&self, effect: &str) -> Vec<&'static str> {
        let mut cols = match self {
            SumstatFormat::PlinkV1 => vec!["#CHROM", "SNP", "A1", "A2", "P"],
            SumstatFormat::PlinkV2 => vec!["#CHROM", "ID", "A1", "REF", "ALT", "P"],
            SumstatFormat::Saige => vec!["MarkerID", "Allele1", "Allele2", "p.value"],
        };
        cols.push(match effect {
            "OR" => "OR",
            _ => "BETA",
        });
        cols
    }
}

/// Converts `input_path` into PRS-CS input format, writing
/// `{out_prefix}.sumstats.prscs.txt` and returning its path.
pub fn reformat_sumstats(
    input_path: &Path,
    format: SumstatFormat,
    out_prefix: &str,
) -> Result<PathBuf, ReformatError> {
    info!("Reading summary statistics from '{}'", input_path.display());
    let mut reader = BufReader::new(File::open(input_path)?);

    let mut header_line = String::new();
    if reader.read_line(&mut header_line)? == 0 {
        return Err(ReformatError::EmptyInput);
    }
    let column_map: HashMap<String, usize> = header_line
        .trim_end()
        .split('\t')
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();

    // Effect size: odds ratio if present, regression coefficient otherwise.
    let effect = if column_map.contains_key("OR") {
        "OR"
    } else if column_map.contains_key("BETA") {
        "BETA"
    } else {
        return Err(ReformatError::MissingEffectColumn);
    };
    for &col in &format.required_columns(effect) {
        if !column_map.contains_key(col) {
            return Err(ReformatError::MissingRequiredColumn(col.to_string()));
        }
    }

    let output_path = PathBuf::from(format!("{out_prefix}.sumstats.prscs.txt"));
    let mut writer = BufWriter::new(File::create(&output_path)?);
    writeln!(writer, "CHR\tSNP\tA1\tA2\t{effect}\tP")?;

    let mut written = 0usize;
    let mut skipped = 0usize;
    for (line_number, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match resolve_row(&fields, format, &column_map, effect) {
            Some(row) => {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    row.chr, row.snp, row.a1, row.a2, row.effect, row.p
                )?;
                written += 1;
            }
            None => {
                warn!(
                    "Skipping malformed row at line {} of '{}'",
                    line_number + 2,
                    input_path.display()
                );
                skipped += 1;
            }
        }
    }
    writer.flush()?;

    info!(
        "Wrote {} variants to '{}' ({} skipped)",
        written,
        output_path.display(),
        skipped
    );
    Ok(output_path)
}

struct OutputRow {
    chr: String,
    snp: String,
    a1: String,
    a2: String,
    effect: String,
    p: String,
}

fn field<'a>(
    fields: &[&'a str],
    column_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let &idx = column_map.get(name)?;
    let value = *fields.get(idx)?;
    if value.is_empty() { None } else { Some(value) }
}

fn resolve_row(
    fields: &[&str],
    format: SumstatFormat,
    column_map: &HashMap<String, usize>,
    effect_name: &str,
) -> Option<OutputRow> {
    let effect = field(fields, column_map, effect_name)?.to_string();
    match format {
        SumstatFormat::PlinkV1 => Some(OutputRow {
            chr: field(fields, column_map, "#CHROM")?.to_string(),
            snp: field(fields, column_map, "SNP")?.to_string(),
            a1: field(fields, column_map, "A1")?.to_string(),
            a2: field(fields, column_map, "A2")?.to_string(),
            effect,
            p: field(fields, column_map, "P")?.to_string(),
        }),
        SumstatFormat::PlinkV2 => {
            let a1 = field(fields, column_map, "A1")?;
            let reference = field(fields, column_map, "REF")?;
            let alt = field(fields, column_map, "ALT")?;
            let a2 = if a1 == alt { reference } else { alt };
            Some(OutputRow {
                chr: field(fields, column_map, "#CHROM")?.to_string(),
                snp: field(fields, column_map, "ID")?.to_string(),
                a1: a1.to_string(),
                a2: a2.to_string(),
                effect,
                p: field(fields, column_map, "P")?.to_string(),
            })
        }
        SumstatFormat::Saige => {
            let marker = field(fields, column_map, "MarkerID")?;
            let (chr, snp) = split_marker_id(marker)?;
            Some(OutputRow {
                chr,
                snp,
                // SAIGE's Allele2 is the effect allele.
                a1: field(fields, column_map, "Allele2")?.to_string(),
                a2: field(fields, column_map, "Allele1")?.to_string(),
                effect,
                p: field(fields, column_map, "p.value")?.to_string(),
            })
        }
    }
}

/// Splits a SAIGE `chr:pos_ref_alt` marker into `(chr, chr:pos)`.
fn split_marker_id(marker: &str) -> Option<(String, String)> {
    let colon = marker.find(':')?;
    let underscore = marker.find('_')?;
    if underscore <= colon + 1 {
        return None;
    }
    let chr = &marker[..colon];
    let snp = &marker[..underscore];
    if chr.is_empty() {
        return None;
    }
    Some((chr.to_string(), snp.to_string()))
}
