//! Command line driver for the hash table testbed.
//!
//! Arguments are `--flag value` pairs; `--config` loads a JSON file that later flags override.
//!
//! ```text
//! hashbench --algo <linear|robinhood|bitmap|shadow> [OPTIONS]
//! hashbench --config table.json --testcase --load_factor 0.9
//! ```
#![allow(
    clippy::missing_docs_in_private_items,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::arithmetic_side_effects
)]

use std::{env, error::Error, fs, path::Path};

use hashbench::{
    HashTable, SnapshotName, TableConfig, Workload, build_table, monitoring::Metric,
};
use plotters::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Output directory and file prefix of batch runs
const TESTCASE: &str = "batch";

#[derive(Debug, Clone)]
struct Options {
    config: TableConfig,
    load_factor: f64,
    testcase: bool,
    seed: u64,
    instances: u32,
    cycles: u32,
    help: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: TableConfig::default(),
            load_factor: 0.8,
            testcase: false,
            seed: 0,
            instances: 10,
            cycles: 50,
            help: false,
        }
    }
}

/// Counters of a batch run
#[derive(Debug, Default)]
struct BatchReport {
    put_failures: usize,
    remove_failures: usize,
    lookup_failures: usize,
    /// Mean successful PSL per cycle, averaged over instances
    mean_psl: Vec<f64>,
}

fn print_usage() {
    eprintln!("Test program for implementations of open addressing hash table algorithms.");
    eprintln!();
    eprintln!("General parameters (mandatory unless --config is given):");
    eprintln!(" --algo            algorithm to use for the hash table. Possible values are:");
    eprintln!("                     * linear: linear probing");
    eprintln!("                     * robinhood: robin hood hashing");
    eprintln!("                     * bitmap: hopscotch hashing with bitmap representation");
    eprintln!("                     * shadow: hopscotch hashing with shadow representation");
    eprintln!(" --config          JSON file with the table parameters; flags override it");
    eprintln!();
    eprintln!("Table parameters (optional):");
    eprintln!(" --num_buckets     number of buckets in the hash table (default=10000)");
    eprintln!(" --size_probing    maximum number of buckets used in the probing (default=4096)");
    eprintln!(" --size_nh_start   starting size of the neighborhoods, shadow only (default=32)");
    eprintln!(" --size_nh_end     ending size of the neighborhoods, shadow only (default=32)");
    eprintln!(" --max_probe       maximum probe length, linear only (default=5000)");
    eprintln!();
    eprintln!("Batch run (optional):");
    eprintln!(" --testcase        run the churn test case and write JSON snapshots to ./batch");
    eprintln!(" --load_factor     target load factor of the test case (default=0.8)");
    eprintln!(" --seed            base seed of the random workload (default=0)");
    eprintln!(" --instances       number of independent instances (default=10)");
    eprintln!(" --cycles          number of churn cycles per instance (default=50)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("hashbench --algo bitmap --num_buckets 1000000");
    eprintln!("hashbench --algo shadow --num_buckets 1000000 --size_nh_start 4 --size_nh_end 64");
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Options, Box<dyn Error>> {
    let mut options = Options::default();
    let mut pairs: Vec<(String, String)> = Vec::new();

    while let Some(flag) = argv.next() {
        match flag.as_str() {
            "--help" | "-h" => options.help = true,
            "--testcase" => options.testcase = true,
            _ if flag.starts_with("--") => {
                let value = argv.next().ok_or_else(|| format!("missing value for {flag}"))?;
                pairs.push((flag, value));
            }
            _ => return Err(format!("unexpected argument '{flag}'").into()),
        }
    }
    if options.help {
        return Ok(options);
    }

    let config_file = pairs.iter().find(|(flag, _)| flag == "--config");
    if let Some((_, path)) = config_file {
        options.config = TableConfig::from_json_file(path)?;
    } else if !pairs.iter().any(|(flag, _)| flag == "--algo") {
        return Err("--algo is required".into());
    }

    for (flag, value) in &pairs {
        match flag.as_str() {
            "--config" => {}
            "--algo" => options.config.algorithm = value.parse()?,
            "--num_buckets" => options.config.num_buckets = value.parse()?,
            "--size_probing" => options.config.size_probing = value.parse()?,
            "--size_nh_start" => options.config.size_nh_start = value.parse()?,
            "--size_nh_end" => options.config.size_nh_end = value.parse()?,
            "--max_probe" => options.config.max_probe_length = value.parse()?,
            "--load_factor" => options.load_factor = value.parse()?,
            "--seed" => options.seed = value.parse()?,
            "--instances" => options.instances = value.parse()?,
            "--cycles" => options.cycles = value.parse()?,
            _ => return Err(format!("unknown option '{flag}'").into()),
        }
    }

    if !(options.load_factor > 0.0 && options.load_factor <= 1.0) {
        return Err(format!("load factor {} is outside (0, 1]", options.load_factor).into());
    }
    options.config.validate()?;
    Ok(options)
}

/// Inserts `key<i>` until the first clustering failure, then verifies and removes every key
fn run_check(table: &mut dyn HashTable<String, String>) -> bool {
    let num_items = table.num_buckets();
    let mut num_items_reached = num_items;

    for i in 0..num_items {
        if let Err(error) = table.put(format!("key{i}"), format!("value{i}")) {
            info!(step = i, load_factor = i as f64 / num_items as f64, %error, "insertion stopped due to clustering");
            num_items_reached = i;
            break;
        }
    }

    let mut ok = true;
    for i in 0..num_items_reached {
        let expected = format!("value{i}");
        if table.get(&format!("key{i}")).map_or(true, |value| *value != expected) {
            warn!(step = i, "final check: wrong or missing value");
            ok = false;
            break;
        }
    }
    if ok {
        info!(keys = num_items_reached, "final check: OK");
    }

    for i in 0..num_items_reached {
        let key = format!("key{i}");
        if table.remove(&key).is_err() || table.get(&key).is_ok() {
            warn!(step = i, "remove check failed");
            return false;
        }
    }
    info!("removing items: OK");
    ok
}

/// Churn test case: per instance, fill to the load factor on the first cycle, then pair each
/// insertion with a random removal, writing density and PSL snapshots after every cycle
fn run_testcase(
    table: &mut dyn HashTable<String, String>,
    options: &Options,
) -> Result<BatchReport, Box<dyn Error>> {
    fs::create_dir_all(TESTCASE)?;
    let num_buckets = table.num_buckets();
    let algorithm = table.metadata().get("name").cloned().unwrap_or_default();
    let num_items = (num_buckets as f64 * options.load_factor) as usize;
    let mut report = BatchReport {
        mean_psl: vec![0.0; options.cycles as usize],
        ..BatchReport::default()
    };

    for instance in 0..options.instances {
        let mut workload = Workload::new(options.seed.wrapping_add(u64::from(instance)));
        table.open();
        table.monitoring_mut().reset();

        for cycle in 0..options.cycles {
            info!(instance, cycle, "running cycle");
            for _ in 0..num_items {
                let key = workload.fresh_key();
                if table.put(key.clone(), key.clone()).is_err() {
                    report.put_failures += 1;
                    workload.discard(&key);
                }
                if cycle > 0 {
                    if let Some(victim) = workload.evict_random() {
                        if table.remove(&victim).is_err() {
                            report.remove_failures += 1;
                        }
                    }
                }
            }

            for key in workload.live_keys() {
                if table.get(key).map_or(true, |value| value != key) {
                    report.lookup_failures += 1;
                }
            }

            let monitoring = table.monitoring_mut();
            monitoring.set_instance(instance);
            monitoring.set_cycle(cycle);
            monitoring.set_load_factor(options.load_factor);
            let name = SnapshotName {
                testcase: TESTCASE.to_string(),
                algorithm: algorithm.clone(),
                num_buckets,
                load_factor: options.load_factor,
                instance,
                cycle,
            };
            monitoring.print_density(name.path(Metric::Density))?;
            monitoring.print_probing_sequence_length_search(name.path(Metric::Psl))?;
            monitoring.print_num_scanned_blocks(name.path(Metric::NumScannedBlocks))?;

            if let Some(mean) = report.mean_psl.get_mut(cycle as usize) {
                *mean += monitoring.mean_psl() / f64::from(options.instances);
            }
        }

        table.close();
    }

    Ok(report)
}

/// Draws the mean successful PSL of every cycle
fn plot_mean_psl(path: &Path, algorithm: &str, mean_psl: &[f64]) -> Result<(), Box<dyn Error>> {
    if mean_psl.is_empty() {
        return Ok(());
    }
    let font_family = "sans-serif";
    let color = RGBColor(50, 90, 220);
    let line_style = ShapeStyle::from(&color).stroke_width(2);

    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_psl = mean_psl.iter().copied().fold(0.0, f64::max).max(1.0) * 1.1; // 10% margin
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Mean probing sequence length ({algorithm})"), (font_family, 35))
        .margin(15)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(0..mean_psl.len(), 0.0..max_psl)?;

    chart
        .configure_mesh()
        .x_desc("Cycle")
        .y_desc("Mean PSL of successful lookups")
        .axis_desc_style((font_family, 16))
        .draw()?;

    chart
        .draw_series(LineSeries::new(mean_psl.iter().copied().enumerate(), line_style))?
        .label(algorithm)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line_style));
    chart.draw_series(
        mean_psl.iter().copied().enumerate().map(|point| Circle::new(point, 4, color.filled())),
    )?;

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;
    root.present()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = match parse_args(env::args().skip(1)) {
        Ok(options) if options.help => {
            print_usage();
            return Ok(());
        }
        Ok(options) => options,
        Err(error) => {
            print_usage();
            return Err(error);
        }
    };

    let mut table = build_table::<String, String>(&options.config)?;
    info!(metadata = ?table.metadata(), "built hash table");

    if options.testcase {
        let report = run_testcase(table.as_mut(), &options)?;
        info!(
            put_failures = report.put_failures,
            remove_failures = report.remove_failures,
            lookup_failures = report.lookup_failures,
            "test case finished"
        );
        let name = SnapshotName {
            testcase: TESTCASE.to_string(),
            algorithm: options.config.algorithm.to_string(),
            num_buckets: table.num_buckets(),
            load_factor: options.load_factor,
            instance: options.instances,
            cycle: options.cycles,
        };
        let chart = name.path(Metric::Psl).with_extension("png");
        plot_mean_psl(&chart, &name.algorithm, &report.mean_psl)?;
        info!(path = %chart.display(), "wrote chart");
        return Ok(());
    }

    if !run_check(table.as_mut()) {
        return Err("consistency check failed".into());
    }
    Ok(())
}
