//! RidgeDB demo driver: builds a small relation, indexes it, runs scans.
//! Usage: ridgedb [CONFIG_PATH]

use anyhow::Result;
use ridgedb::buffer::BufMgr;
use ridgedb::storage::RelationFile;
use ridgedb::{BTreeIndex, Config, Datatype, Operator};
use std::env;
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

const DEMO_RECORDS: i32 = 5000;
const KEY_OFFSET: usize = 4;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match env::args().nth(1) {
        Some(path) => Config::from_path(&PathBuf::from(path))?,
        None => Config::default_config(),
    };

    let relation = PathBuf::from(&config.data_dir).join("demo.rel");
    let relation_name = relation.to_string_lossy().into_owned();
    // Start from a clean slate so reruns rebuild the demo data.
    let _ = std::fs::remove_file(&relation);
    let _ = std::fs::remove_file(format!("{}.{}", relation_name, KEY_OFFSET));

    let pool = Rc::new(BufMgr::new(config.buffer_pool_size));

    let mut rel = RelationFile::create(&pool, &relation)?;
    for i in 0..DEMO_RECORDS {
        rel.append(&demo_record(i))?;
    }
    rel.finish()?;
    tracing::info!(relation = %relation_name, records = DEMO_RECORDS, "demo relation built");

    let (mut index, index_name) =
        BTreeIndex::open(&pool, &relation_name, KEY_OFFSET, Datatype::Integer)?;
    tracing::info!(index = %index_name, "index ready");

    for (low, high) in [(0, 9), (2500, 2600), (DEMO_RECORDS - 5, DEMO_RECORDS + 5)] {
        index.start_scan(low, Operator::Gte, high, Operator::Lte)?;
        let mut hits = 0usize;
        loop {
            match index.scan_next() {
                Ok(_) => hits += 1,
                Err(ridgedb::Error::IndexScanCompleted) => break,
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(low, high, hits, "range scan");
    }

    index.close()?;
    Ok(())
}

/// Demo tuple: a u32 row number, the i32 key at byte offset 4, filler text.
fn demo_record(i: i32) -> Vec<u8> {
    let mut rec = vec![0u8; 24];
    rec[0..4].copy_from_slice(&(i as u32).to_le_bytes());
    rec[4..8].copy_from_slice(&i.to_le_bytes());
    rec[8..24].copy_from_slice(b"ridgedb demo row");
    rec
}
