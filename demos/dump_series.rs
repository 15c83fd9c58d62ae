// Dump a target's resolved series as JSON (decodes stored t-digest BLOBs).
//
// Usage: cargo run --example dump_series -- [DB_PATH] [TARGET_ID] [HOURS]
//   DB_PATH    default: ./vaportrail.db
//   TARGET_ID  default: 1
//   HOURS      default: 1

use std::env;

use vaportrail::clock::{Clock, SystemClock};
use vaportrail::query::{query_series, QueryRange};
use vaportrail::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let path = args.get(1).map(String::as_str).unwrap_or("./vaportrail.db");
    let target_id: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
    let hours: i64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1);

    let store = Store::connect(path).await?;
    let target = store.get_target(target_id).await?;

    let end = SystemClock.now();
    let range = QueryRange {
        start: end - chrono::Duration::hours(hours),
        end,
    };
    let points = query_series(&store, &target, range).await?;

    println!("{}", serde_json::to_string_pretty(&points)?);
    Ok(())
}
