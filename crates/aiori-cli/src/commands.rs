use std::sync::Arc;

use aiori_daos::{
    run_or_abort, Access, Aiori, CollectiveResultExt, DaosBackend, DaosOptions, DaosResult,
    XferHints,
};
use aiori_engine::{EngineStats, InMemoryCluster, InMemoryEngine};
use aiori_group::{ProcessGroup, ThreadGroup, ThreadMember};
use aiori_types::{ObjectClass, ObjectIdentity, Rank};
use anyhow::{bail, Context};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::*;

const DEFAULT_GROUP: &str = "daos_server";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args, cli.format),
        Command::Oid(args) => cmd_oid(args, cli.format),
    }
}

// ---------------------------------------------------------------
// oid
// ---------------------------------------------------------------

#[derive(Serialize)]
struct OidReport {
    name: String,
    oclass: &'static str,
    oid: String,
    hex: String,
    version: u8,
}

fn cmd_oid(args: OidArgs, format: OutputFormat) -> anyhow::Result<()> {
    let class = ObjectClass::from_name(&args.oclass)
        .with_context(|| format!("Invalid DAOS Object class {}", args.oclass))?;
    let oid = ObjectIdentity::derive(&args.name, class);
    let report = OidReport {
        name: args.name,
        oclass: class.name(),
        oid: oid.to_string(),
        hex: oid.to_hex(),
        version: oid.version(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("{} {}", report.name.bold(), report.oid.cyan());
            println!("  class:   {}", report.oclass.yellow());
            println!("  hex:     {}", report.hex);
            println!("  version: {}", report.version);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------
// run
// ---------------------------------------------------------------

/// Geometry of one run, shared by every rank.
#[derive(Clone, Copy, Debug, Serialize)]
struct Workload {
    ranks: u64,
    block_size: u64,
    transfer_size: u64,
    segments: u64,
    file_per_proc: bool,
}

impl Workload {
    fn transfers_per_block(&self) -> u64 {
        self.block_size / self.transfer_size
    }

    /// File offset of transfer `i` of segment `seg` for `rank`.
    fn offset(&self, rank: u64, seg: u64, i: u64) -> u64 {
        let base = if self.file_per_proc {
            seg * self.block_size
        } else {
            (seg * self.ranks + rank) * self.block_size
        };
        base + i * self.transfer_size
    }

    /// Expected size of each test file at the end of the write phase.
    fn file_size(&self) -> u64 {
        let per_rank = self.segments * self.block_size;
        if self.file_per_proc {
            per_rank
        } else {
            per_rank * self.ranks
        }
    }
}

/// Byte written at `offset` by `rank`.
fn pattern_byte(offset: u64, rank: u64) -> u8 {
    (offset.wrapping_mul(0x9e37_79b9) >> 7) as u8 ^ (rank as u8).wrapping_mul(17)
}

fn fill_pattern(buf: &mut [u8], offset: u64, rank: u64) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = pattern_byte(offset + i as u64, rank);
    }
}

fn count_mismatches(buf: &[u8], offset: u64, rank: u64) -> u64 {
    buf.iter()
        .enumerate()
        .filter(|(i, b)| **b != pattern_byte(offset + *i as u64, rank))
        .count() as u64
}

#[derive(Clone, Debug, Serialize)]
struct RankReport {
    rank: u32,
    write_secs: f64,
    read_secs: f64,
    bytes: u64,
    file_size: u64,
    errors: u64,
}

#[derive(Serialize)]
struct RunSummary {
    workload: Workload,
    oclass: &'static str,
    write_mib_per_sec: f64,
    read_mib_per_sec: f64,
    total_bytes: u64,
    errors: u64,
    size_mismatches: usize,
    ranks: Vec<RankReport>,
    engine: EngineStats,
}

fn cmd_run(args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.ranks == 0 {
        bail!("need at least one rank");
    }
    if args.transfer_size == 0 || args.block_size % args.transfer_size != 0 {
        bail!(
            "block size {} must be a non-zero multiple of transfer size {}",
            args.block_size,
            args.transfer_size
        );
    }

    let mut options = match &args.config {
        Some(path) => DaosOptions::load(path)?,
        None => DaosOptions::default(),
    };
    options.apply_args(&args.options)?;
    let cluster = provision(&mut options)?;
    options.check_params()?;
    let oclass = options.object_class()?.name();

    let workload = Workload {
        ranks: args.ranks as u64,
        block_size: args.block_size,
        transfer_size: args.transfer_size,
        segments: args.segments,
        file_per_proc: args.file_per_proc,
    };
    info!(?workload, oclass, "starting run");

    let results = ThreadGroup::run(args.ranks, |member| {
        let mut backend = DaosBackend::new(cluster.client(), &member, options.clone());
        run_or_abort(&member, || run_rank(&mut backend, &args, &workload))
    });

    let mut reports = Vec::with_capacity(results.len());
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(report) => reports.push(report),
            Err(e) if e.is_remote_abort() => {}
            Err(e) => bail!("rank {rank} failed: {e}"),
        }
    }
    if reports.len() != args.ranks {
        bail!("run aborted");
    }

    let summary = summarize(workload, oclass, reports, cluster.stats());
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_summary(&summary),
    }
    if summary.errors > 0 || summary.size_mismatches > 0 {
        bail!(
            "verification failed: {} corrupt bytes, {} size mismatches",
            summary.errors,
            summary.size_mismatches
        );
    }
    Ok(())
}

/// Fill in missing pool, container and service ranks, then build a cluster
/// that serves them.
fn provision(options: &mut DaosOptions) -> anyhow::Result<Arc<InMemoryCluster>> {
    options.pool.get_or_insert_with(|| Uuid::new_v4().to_string());
    options.cont.get_or_insert_with(|| Uuid::new_v4().to_string());
    options.svcl.get_or_insert_with(|| "0".to_string());
    let group = options
        .group
        .get_or_insert_with(|| DEFAULT_GROUP.to_string())
        .clone();

    let cluster = InMemoryCluster::new(group);
    cluster.create_pool(options.pool_uuid()?, options.service_ranks()?);
    Ok(cluster)
}

fn run_rank(
    backend: &mut DaosBackend<InMemoryEngine, &ThreadMember>,
    args: &RunArgs,
    workload: &Workload,
) -> DaosResult<RankReport> {
    let rank = backend.group().rank();
    let r = u64::from(rank.0);
    let name = if workload.file_per_proc {
        format!("{}.{:08}", args.test_file, rank.0)
    } else {
        args.test_file.clone()
    };

    backend.set_xfer_hints(XferHints {
        file_per_proc: workload.file_per_proc,
    });
    backend.initialize()?;

    let mut order: Vec<u64> = (0..workload.transfers_per_block()).collect();
    if args.random {
        order.shuffle(&mut StdRng::seed_from_u64(args.seed ^ r));
    }
    let mut buf = vec![0u8; workload.transfer_size as usize];

    // Write phase.
    backend.group().barrier().collective("barrier")?;
    let start = backend.group().wtime();
    backend.create(&name)?;
    for seg in 0..workload.segments {
        for &i in &order {
            let offset = workload.offset(r, seg, i);
            fill_pattern(&mut buf, offset, r);
            backend.xfer(Access::Write, &mut buf, workload.transfer_size, offset)?;
        }
    }
    if args.fsync {
        backend.fsync()?;
    }
    backend.close()?;
    backend.group().barrier().collective("barrier")?;
    let write_secs = backend.group().wtime() - start;

    let file_size = backend.get_file_size(&name)?;
    if file_size != workload.file_size() {
        warn!(%rank, file_size, expected = workload.file_size(), "unexpected file size");
    }

    // Read phase.
    backend.group().barrier().collective("barrier")?;
    let start = backend.group().wtime();
    backend.open(&name)?;
    let mut errors = 0;
    for seg in 0..workload.segments {
        for &i in &order {
            let offset = workload.offset(r, seg, i);
            backend.xfer(Access::Read, &mut buf, workload.transfer_size, offset)?;
            errors += count_mismatches(&buf, offset, r);
        }
    }
    backend.close()?;
    backend.group().barrier().collective("barrier")?;
    let read_secs = backend.group().wtime() - start;

    if !args.keep_file && (workload.file_per_proc || rank == Rank::ZERO) {
        backend.delete(&name)?;
    }
    backend.finalize()?;

    Ok(RankReport {
        rank: rank.0,
        write_secs,
        read_secs,
        bytes: workload.segments * workload.block_size,
        file_size,
        errors,
    })
}

fn summarize(
    workload: Workload,
    oclass: &'static str,
    ranks: Vec<RankReport>,
    engine: EngineStats,
) -> RunSummary {
    let total_bytes: u64 = ranks.iter().map(|r| r.bytes).sum();
    let write_secs = ranks.iter().map(|r| r.write_secs).fold(0.0, f64::max);
    let read_secs = ranks.iter().map(|r| r.read_secs).fold(0.0, f64::max);
    let mib = total_bytes as f64 / (1024.0 * 1024.0);
    let rate = |secs: f64| if secs > 0.0 { mib / secs } else { 0.0 };
    RunSummary {
        workload,
        oclass,
        write_mib_per_sec: rate(write_secs),
        read_mib_per_sec: rate(read_secs),
        total_bytes,
        errors: ranks.iter().map(|r| r.errors).sum(),
        size_mismatches: ranks
            .iter()
            .filter(|r| r.file_size != workload.file_size())
            .count(),
        ranks,
        engine,
    }
}

fn print_summary(s: &RunSummary) {
    let mode = if s.workload.file_per_proc {
        "file per process"
    } else {
        "single shared file"
    };
    println!(
        "{} {} ranks, {}, class {}",
        "ior-daos".bold(),
        s.workload.ranks,
        mode,
        s.oclass.yellow()
    );
    println!(
        "  block {} B, transfer {} B, segments {}",
        s.workload.block_size, s.workload.transfer_size, s.workload.segments
    );
    println!("  {:<6} {:>12.2} MiB/s", "write".cyan(), s.write_mib_per_sec);
    println!("  {:<6} {:>12.2} MiB/s", "read".cyan(), s.read_mib_per_sec);
    println!(
        "  engine: {} array creates, {} array opens, {} handle imports",
        s.engine.array_creates, s.engine.array_opens, s.engine.global2local
    );
    if s.errors == 0 && s.size_mismatches == 0 {
        println!("{} {} bytes verified", "✓".green().bold(), s.total_bytes);
    } else {
        println!(
            "{} {} corrupt bytes, {} size mismatches",
            "✗".red().bold(),
            s.errors,
            s.size_mismatches
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["ior-daos", "run"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Run(args) => args,
            Command::Oid(_) => unreachable!(),
        }
    }

    #[test]
    fn shared_offsets_interleave_ranks() {
        let w = Workload {
            ranks: 4,
            block_size: 100,
            transfer_size: 25,
            segments: 2,
            file_per_proc: false,
        };
        assert_eq!(w.transfers_per_block(), 4);
        assert_eq!(w.offset(0, 0, 0), 0);
        assert_eq!(w.offset(1, 0, 0), 100);
        assert_eq!(w.offset(3, 0, 3), 375);
        assert_eq!(w.offset(0, 1, 0), 400);
        assert_eq!(w.file_size(), 800);
    }

    #[test]
    fn per_process_offsets_start_at_zero() {
        let w = Workload {
            ranks: 4,
            block_size: 100,
            transfer_size: 50,
            segments: 3,
            file_per_proc: true,
        };
        assert_eq!(w.offset(3, 0, 0), 0);
        assert_eq!(w.offset(3, 2, 1), 250);
        assert_eq!(w.file_size(), 300);
    }

    #[test]
    fn pattern_depends_on_rank_and_offset() {
        let mut a = vec![0u8; 64];
        fill_pattern(&mut a, 4096, 1);
        assert_eq!(count_mismatches(&a, 4096, 1), 0);
        assert!(count_mismatches(&a, 4096, 2) > 0);
        assert!(count_mismatches(&a, 4097, 1) > 0);
    }

    #[test]
    fn shared_run_verifies() {
        let args = run_args(&["-n", "3", "-b", "16k", "-t", "4k", "-s", "2"]);
        cmd_run(args, OutputFormat::Json).unwrap();
    }

    #[test]
    fn per_process_random_run_verifies() {
        let args = run_args(&["-n", "3", "-F", "-z", "-b", "8k", "-t", "1k", "-O", "daos.destroy"]);
        cmd_run(args, OutputFormat::Text).unwrap();
    }

    #[test]
    fn bad_object_class_fails_before_running() {
        let args = run_args(&["-O", "daos.oclass=NOPE"]);
        let err = cmd_run(args, OutputFormat::Text).unwrap_err();
        assert!(err.to_string().contains("Invalid DAOS Object class NOPE"));
    }

    #[test]
    fn block_must_be_multiple_of_transfer() {
        let args = run_args(&["-b", "10k", "-t", "3k"]);
        assert!(cmd_run(args, OutputFormat::Text).is_err());
    }

    #[test]
    fn provision_fills_missing_identifiers() {
        let mut options = DaosOptions::default();
        let cluster = provision(&mut options).unwrap();
        assert!(options.is_complete());
        assert_eq!(cluster.group(), DEFAULT_GROUP);
        options.check_params().unwrap();
    }

    #[test]
    fn oid_report() {
        cmd_oid(
            OidArgs {
                name: "testfile".into(),
                oclass: "RP_2G1".into(),
            },
            OutputFormat::Json,
        )
        .unwrap();
        assert!(cmd_oid(
            OidArgs {
                name: "testfile".into(),
                oclass: "bogus".into(),
            },
            OutputFormat::Text,
        )
        .is_err());
    }
}
