use anyhow::Context;
use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::assignment::partition::Partition;
use crate::util::file_utils::{checkpoint_path, membership_path, remove_stale};
use crate::util::scimm_types::{AssignmentMode, Priors, ReadSet, WeightedRead};

fn create_truncated(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("couldn't create output file {}", path.display()))?;
    Ok(BufWriter::new(f))
}

fn write_record<W: Write>(w: &mut W, header: &str, seq: &[u8]) -> std::io::Result<()> {
    writeln!(w, ">{header}")?;
    w.write_all(seq)?;
    writeln!(w)
}

/// Write the given reads as FASTA to `path`, replacing its contents.
pub fn write_membership<I>(path: &Path, reads: &ReadSet, members: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = usize>,
{
    let mut w = create_truncated(path)?;
    for r in members {
        let rec = reads.get(r);
        write_record(&mut w, &rec.name, &rec.seq)?;
    }
    w.flush()?;
    Ok(())
}

/// Write the training input of one cluster. Under soft assignment
/// every header carries the read's weight as `>weight;read_id`.
pub fn write_training_set(
    path: &Path,
    reads: &ReadSet,
    training: &[WeightedRead],
    mode: AssignmentMode,
) -> anyhow::Result<()> {
    let mut w = create_truncated(path)?;
    for wr in training {
        let rec = reads.get(wr.read);
        match mode {
            AssignmentMode::Hard => write_record(&mut w, &rec.name, &rec.seq)?,
            AssignmentMode::Soft => {
                write_record(&mut w, &format!("{:.6};{}", wr.weight, rec.name), &rec.seq)?
            }
        }
    }
    w.flush()?;
    Ok(())
}

/// Rewrite `cluster-<c>.fa` for every live cluster and drop the
/// listings of clusters that no longer exist.
pub fn write_partition(dir: &Path, reads: &ReadSet, partition: &Partition) -> anyhow::Result<()> {
    for c in 0..partition.num_clusters() {
        write_membership(&membership_path(dir, c), reads, partition.members(c))?;
    }
    remove_stale(dir, partition.num_clusters(), membership_path)
}

/// Same as [`write_partition`], for the `cluster-<c>.max` checkpoint.
pub fn write_checkpoint(dir: &Path, reads: &ReadSet, partition: &Partition) -> anyhow::Result<()> {
    for c in 0..partition.num_clusters() {
        write_membership(&checkpoint_path(dir, c), reads, partition.members(c))?;
    }
    remove_stale(dir, partition.num_clusters(), checkpoint_path)
}

#[derive(Serialize)]
struct AssignmentRecord<'a> {
    read: &'a str,
    cluster: usize,
}

/// The final read to cluster mapping, one row per read.
pub fn write_assignments(path: &Path, reads: &ReadSet, partition: &Partition) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("couldn't create {}", path.display()))?;
    for (r, c) in partition.assignments().iter().enumerate() {
        wtr.serialize(AssignmentRecord {
            read: reads.name(r),
            cluster: *c,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_meta_info(dir: &Path, info: &serde_json::Value) -> anyhow::Result<()> {
    let path = dir.join("meta_info.json");
    let w = create_truncated(&path)?;
    serde_json::ser::to_writer_pretty(w, info)
        .with_context(|| format!("couldn't write {}", path.display()))?;
    Ok(())
}

/// One row per cluster: reads, bases and prior.
pub fn cluster_table(reads: &ReadSet, partition: &Partition, priors: &Priors) -> tabled::Table {
    let k = partition.num_clusters();
    let mut bases = vec![0_usize; k];
    let mut counts = vec![0_usize; k];
    for (r, c) in partition.assignments().iter().enumerate() {
        bases[*c] += reads.seq_len(r);
        counts[*c] += 1;
    }

    let mut builder = Builder::default();
    builder.push_record(["cluster", "reads", "bases", "prior"]);
    for c in 0..k {
        let prior = if c < priors.len() {
            format!("{:.4}", priors.get(c))
        } else {
            "-".to_string()
        };
        builder.push_record([
            c.to_string(),
            counts[c].to_formatted_string(&Locale::en),
            bases[c].to_formatted_string(&Locale::en),
            prior,
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table
}
