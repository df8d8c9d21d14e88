//! Column family example for Strata
//!
//! Keeps documents and a secondary index in separate column families,
//! updates both atomically and reopens the database with every family.

use std::sync::Arc;

use anyhow::{bail, Context};
use strata::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, FlushOptions, Options, ReverseBytewiseComparator,
    WriteBatch, DB,
};

fn descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new("index", ColumnFamilyOptions::default()),
        ColumnFamilyDescriptor::new(
            "recent",
            ColumnFamilyOptions::default().comparator(Arc::new(ReverseBytewiseComparator)),
        ),
    ]
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::temp_dir().join("strata_cf_example");
    let _ = std::fs::remove_dir_all(&path);

    {
        let db = DB::open_cf(&path, Options::default(), descriptors())?;
        let index = db.cf_handle("index").context("index family missing")?;
        let recent = db.cf_handle("recent").context("recent family missing")?;

        for (id, title) in [(1, "rust storage"), (2, "lsm trees"), (3, "rust lsm")] {
            let doc_key = format!("doc:{}", id);
            let mut batch = WriteBatch::new();
            batch.put(doc_key.as_bytes(), title.as_bytes());
            for word in title.split_whitespace() {
                batch.put_cf(&index, format!("{}/{}", word, id).as_bytes(), b"");
            }
            batch.put_cf(&recent, format!("{:04}", id).as_bytes(), doc_key.as_bytes());
            db.write(batch)?;
        }

        db.flush_cf(&index, FlushOptions::default())?;
        println!(
            "index has {} table(s) in level 0",
            db.num_files_at_level(&index, 0)
        );

        let scratch = db.create_column_family("scratch", ColumnFamilyOptions::default())?;
        db.put_cf(&scratch, b"tmp", b"data")?;
        db.drop_column_family(&scratch)?;
        db.close()?;
    }

    let names = DB::list_column_families(&path)?;
    println!("column families on disk: {:?}", names);
    if names.iter().any(|n| n == "scratch") {
        bail!("dropped column family still listed");
    }

    let db = DB::open_cf(&path, Options::default(), descriptors())?;
    let index = db.cf_handle("index").context("index family missing")?;
    let recent = db.cf_handle("recent").context("recent family missing")?;

    println!("documents mentioning \"rust\":");
    for entry in db.scan_cf(
        &index,
        Some(b"rust/".as_slice()),
        Some(b"rust0".as_slice()),
        Default::default(),
    )? {
        let (key, _) = entry?;
        let key = String::from_utf8_lossy(&key).into_owned();
        let id = key.rsplit('/').next().unwrap_or_default();
        let doc = db.get(format!("doc:{}", id).as_bytes())?;
        println!(
            "  {} => {:?}",
            key,
            doc.map(|d| String::from_utf8_lossy(&d).into_owned())
        );
    }

    println!("newest first:");
    for entry in db.iter_cf(&recent, Default::default())? {
        let (key, value) = entry?;
        println!(
            "  {} => {}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }

    db.close()?;
    Ok(())
}
