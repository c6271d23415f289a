//! Driver program exercising the storage core's top-level APIs without a
//! SQL front end: `put`/`get`/`scan` directly against a single table
//! B-tree rooted at page 1.

use anyhow::{anyhow, bail, Result};
use env_logger::Env;

use btreestore::btree::Btree;
use btreestore::cell::Cell;
use btreestore::record::{Record, Value};

const TABLE_ROOT: u32 = 1;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("Missing <database path> and <command>"),
        2 => bail!("Missing <command>"),
        _ => {}
    }

    let mut bt = Btree::open(&args[1])?;

    match args[2].as_str() {
        "put" => {
            let key: u32 = args
                .get(3)
                .ok_or_else(|| anyhow!("put needs a key"))?
                .parse()?;
            let text = args.get(4).ok_or_else(|| anyhow!("put needs a value"))?;
            let payload = Record::new(vec![Value::Text(text.clone())]).encode()?;
            bt.insert(TABLE_ROOT, Cell::TableLeaf { key, payload })?;
            println!("inserted key {key}");
        }
        "get" => {
            let key: u32 = args
                .get(3)
                .ok_or_else(|| anyhow!("get needs a key"))?
                .parse()?;
            let payload = bt.find(TABLE_ROOT, key)?;
            let record = Record::decode(&payload)?;
            println!("{:?}", record.values);
        }
        "scan" => {
            for (key, payload) in bt.scan_table(TABLE_ROOT)? {
                let record = Record::decode(&payload)?;
                println!("{key}: {:?}", record.values);
            }
        }
        other => bail!("unknown command: {other}"),
    }

    bt.close()?;
    Ok(())
}
