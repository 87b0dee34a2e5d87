use anyhow::Context;
use needletail::parse_fastx_file;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::util::errors::ClusterError;
use crate::util::file_utils::is_nonempty_file;
use crate::util::scimm_types::{ReadInfo, ReadSet};

/// The read identifier is the header up to the first whitespace.
fn read_id(header: &[u8]) -> String {
    let id = header
        .split(|b| b.is_ascii_whitespace())
        .next()
        .unwrap_or_default();
    String::from_utf8_lossy(id).into_owned()
}

/// Parse every record of a (possibly gzipped) FASTA/Q file. An empty
/// file has no records.
pub fn read_fasta(path: &Path) -> anyhow::Result<Vec<ReadInfo>> {
    if !is_nonempty_file(path) {
        if path.is_file() {
            return Ok(Vec::new());
        }
        anyhow::bail!("could not find sequence file {}", path.display());
    }
    let mut reader =
        parse_fastx_file(path).with_context(|| format!("opening sequence file {}", path.display()))?;
    let mut records = Vec::new();
    while let Some(rec) = reader.next() {
        let rec = rec.with_context(|| format!("parsing {}", path.display()))?;
        records.push(ReadInfo::new(read_id(rec.id()), rec.seq().into_owned()));
    }
    Ok(records)
}

pub fn load_reads(path: &Path) -> anyhow::Result<ReadSet> {
    ReadSet::from_reads(read_fasta(path)?)
}

/// Read a whitespace separated, two column file, skipping blank lines.
fn read_two_columns(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (None, _) => continue,
            (Some(a), Some(b)) => rows.push((a.to_string(), b.to_string())),
            (Some(_), None) => anyhow::bail!(
                "{}:{} should have two whitespace separated columns",
                path.display(),
                lineno + 1
            ),
        }
    }
    Ok(rows)
}

/// Mate pairs, one `read_a read_b` per line.
pub fn read_mates(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    read_two_columns(path)
}

/// Constraints, one `read cluster` per line.
pub fn read_constraints(path: &Path) -> anyhow::Result<Vec<(String, usize)>> {
    read_two_columns(path)?
        .into_iter()
        .map(|(r, c)| {
            let c = c
                .parse::<usize>()
                .with_context(|| format!("cluster index for read {} in {}", r, path.display()))?;
            Ok((r, c))
        })
        .collect()
}

/// Score listing produced by a cluster model, one `read score` per line.
pub fn read_score_listing(path: &Path) -> anyhow::Result<FxHashMap<String, f64>> {
    let mut listing = FxHashMap::default();
    for (r, s) in read_two_columns(path)? {
        let s = s
            .parse::<f64>()
            .with_context(|| format!("score for read {} in {}", r, path.display()))?;
        listing.insert(r, s);
    }
    Ok(listing)
}

/// Indices of the reads listed in a membership file for `cluster`.
pub fn read_membership(path: &Path, reads: &ReadSet, cluster: usize) -> anyhow::Result<Vec<usize>> {
    let mut members = Vec::new();
    for rec in read_fasta(path)? {
        match reads.id_of(&rec.name) {
            Some(r) => members.push(r),
            None => {
                return Err(ClusterError::UnknownRead {
                    read: rec.name,
                    cluster,
                }
                .into());
            }
        }
    }
    Ok(members)
}
