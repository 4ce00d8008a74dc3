//! Hierarchical allreduce over 2 locations of 4 ranks each.
//!
//! Every rank enables the hierarchical module on the world group, then runs
//! an allreduce large enough to be split into several pipeline segments.
//!
//! ```bash
//! RUST_LOG=tessera_han=debug cargo run -p tessera-han --example hierarchical_allreduce
//! ```

use std::sync::Arc;

use tessera::{DataType, LocalFabric, ModuleCatalog, ProcessGroup, ReduceOp, SendBuf, TunedModule};
use tessera_han::{HanConfig, HanModule};

#[tokio::main]
async fn main() -> tessera_han::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let fabric = LocalFabric::builder(8).uniform_locations(2, 4).build()?;
    let groups = ProcessGroup::bootstrap_local(&fabric, Arc::new(TunedModule::new()));

    // 1024 f32 values in 1 KiB segments: 4 segments through the pipeline.
    let count = 1024usize;
    let config = HanConfig::from_env().with_segment_bytes(1024);

    let mut handles = Vec::new();
    for group in groups {
        let han = HanModule::enable(&group, ModuleCatalog::standard(), config.clone())?;
        handles.push(tokio::spawn(async move {
            let rank = group.rank();
            let mut data = vec![rank as f32; count];
            unsafe {
                group
                    .allreduce(
                        SendBuf::InPlace,
                        data.as_mut_ptr() as u64,
                        count,
                        DataType::F32,
                        ReduceOp::Sum,
                    )
                    .await?;
            }
            tessera::Result::Ok((rank, data[0], han.stats()))
        }));
    }

    for h in handles {
        let (rank, first, stats) = h.await.unwrap()?;
        println!("rank {rank}: {first} ({stats:?})");
    }
    // Every rank prints 28 (0 + 1 + ... + 7) and one pipeline run.

    Ok(())
}
