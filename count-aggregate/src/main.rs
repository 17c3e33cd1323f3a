//! Concatenate checkpoint records into a `frame,count` CSV.

use anyhow::Result;
use clap::*;
use lanecount::checkpoint::{concat_counts, load_checkpoints};
use log::*;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
struct Row {
    frame: usize,
    count: usize,
}

/// Write all counts stored in `dir` to `out`, in record filename order.
///
/// Returns the number of rows written.
fn aggregate(dir: &Path, stem: &str, out: impl Write) -> Result<usize> {
    let records = load_checkpoints(dir, stem)?;

    info!("Loaded {} records from {}", records.len(), dir.display());

    let counts = concat_counts(&records);
    let mut writer = csv::Writer::from_writer(out);

    for (frame, &count) in counts.iter().enumerate() {
        writer.serialize(Row { frame, count })?;
    }

    writer.flush()?;

    Ok(counts.len())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("count-aggregate")
        .version(crate_version!())
        .about("Concatenates checkpoint records into a single CSV")
        .arg(Arg::new("dir").takes_value(true).required(true))
        .arg(
            Arg::new("stem")
                .long("stem")
                .takes_value(true)
                .default_value("count"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .takes_value(true)
                .help("CSV file to write, stdout if omitted"),
        )
        .get_matches();

    let dir = matches
        .value_of("dir")
        .ok_or_else(|| anyhow::anyhow!("Please supply a checkpoint directory!"))?;
    let stem = matches.value_of("stem").unwrap_or("count");

    let rows = match matches.value_of("output") {
        Some(output) => aggregate(Path::new(dir), stem, std::fs::File::create(output)?)?,
        None => aggregate(Path::new(dir), stem, std::io::stdout().lock())?,
    };

    info!("Wrote {rows} frame counts");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanecount::prelude::v1::*;

    #[test]
    fn concatenates_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path(), "count").unwrap();

        sink.write(&CheckpointRecord {
            count: vec![1, 0],
            index: 1,
        })
        .unwrap();
        sink.write(&CheckpointRecord {
            count: vec![2, 3],
            index: 7,
        })
        .unwrap();

        let mut out = vec![];
        let rows = aggregate(dir.path(), "count", &mut out).unwrap();

        assert_eq!(rows, 4);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "frame,count\n0,1\n1,0\n2,2\n3,3\n"
        );
    }

    #[test]
    fn empty_directory_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();

        let mut out = vec![];
        assert_eq!(aggregate(dir.path(), "count", &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }
}
