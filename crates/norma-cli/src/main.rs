use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use norma_core::{DType, Tensor};
use norma_kernels::{
    dropout_add_ln_fwd, fwd_registry, DispatchError, FwdArgs, FwdOutputs, Generator, HostRuntime,
    HostRuntimeConfig,
};

const BANNER: &str = r#"
 _ __   ___  _ __ _ __ ___   __ _
| '_ \ / _ \| '__| '_ ` _ \ / _` |
| | | | (_) | |  | | | | | | (_| |
|_| |_|\___/|_|  |_| |_| |_|\__,_|"#;

#[derive(Parser)]
#[command(
    name = "norma",
    about = "Fused dropout + residual + layer-norm kernels",
    version
)]
struct Cli {
    /// Host runtime config (JSON); defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the virtual device and registry summary
    Info,
    /// List every registered kernel variant
    Kernels {
        /// Only show variants for this input dtype (f16, bf16, f32)
        #[arg(long)]
        input: Option<String>,
    },
    /// Run one fused forward on random data
    Run {
        #[arg(long, default_value = "8")]
        rows: usize,
        #[arg(long, default_value = "1024")]
        cols: usize,
        /// Input dtype: f16, bf16, f32
        #[arg(long, default_value = "f32")]
        dtype: String,
        /// Weight dtype; defaults to f32
        #[arg(long, default_value = "f32")]
        weight_dtype: String,
        #[arg(long, default_value = "0.0")]
        dropout: f32,
        #[arg(long, default_value = "1e-5")]
        eps: f32,
        /// Add a random residual of the input dtype
        #[arg(long)]
        residual: bool,
        /// Keep the residual stream in f32
        #[arg(long)]
        residual_in_fp32: bool,
        /// RMS-norm instead of layer-norm
        #[arg(long)]
        rms: bool,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },
    /// Time the forward across hidden sizes
    Bench {
        /// Hidden sizes (comma-separated)
        #[arg(long, default_value = "256,1024,4096,8192")]
        sizes: String,
        #[arg(long, default_value = "64")]
        rows: usize,
        #[arg(long, default_value = "f32")]
        dtype: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = load_runtime(cli.config.as_deref());

    let result = match cli.command {
        Commands::Info => {
            cmd_info(&runtime);
            Ok(())
        }
        Commands::Kernels { input } => cmd_kernels(input.as_deref()),
        Commands::Run {
            rows,
            cols,
            dtype,
            weight_dtype,
            dropout,
            eps,
            residual,
            residual_in_fp32,
            rms,
            seed,
            json,
        } => cmd_run(
            &runtime,
            RunOptions {
                rows,
                cols,
                dtype: parse_dtype(&dtype),
                weight_dtype: parse_dtype(&weight_dtype),
                dropout,
                eps,
                residual,
                residual_in_fp32,
                rms,
                seed,
                json,
            },
        ),
        Commands::Bench { sizes, rows, dtype } => cmd_bench(&runtime, &sizes, rows, parse_dtype(&dtype)),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn load_runtime(path: Option<&std::path::Path>) -> HostRuntime {
    let config = match path {
        Some(p) => HostRuntimeConfig::from_json_file(p).unwrap_or_else(|| {
            tracing::warn!(path = %p.display(), "unreadable runtime config, using defaults");
            HostRuntimeConfig::default()
        }),
        None => HostRuntimeConfig::default(),
    };
    HostRuntime::new(config)
}

fn parse_dtype(name: &str) -> Result<DType, String> {
    DType::from_name(name).ok_or_else(|| format!("unknown dtype '{}'", name))
}

fn cmd_info(runtime: &HostRuntime) {
    println!("{}", BANNER);
    println!("  v{}  -  fused dropout + residual + layer-norm\n", env!("CARGO_PKG_VERSION"));

    let cfg = runtime.config();
    println!("Device ({})", cfg.name);
    println!("  multiprocessors:       {}", cfg.multiprocessor_count);
    println!("  threads / MP:          {}", cfg.max_threads_per_multiprocessor);
    println!("  CTAs / MP:             {}", cfg.max_ctas_per_multiprocessor);
    println!("  shared memory / MP:    {} bytes", cfg.shared_memory_per_multiprocessor);
    match cfg.memory_limit_bytes {
        Some(limit) => println!("  allocation limit:      {} bytes", limit),
        None => println!("  allocation limit:      none"),
    }

    let reg = fwd_registry();
    let keys = reg.keys();
    let mut buckets: Vec<u32> = keys.iter().map(|k| k.hidden_size).collect();
    buckets.sort_unstable();
    buckets.dedup();
    let mut combos: Vec<String> = keys.iter().map(|k| k.types.to_string()).collect();
    combos.sort();
    combos.dedup();

    println!("\nRegistry ({} variants)", reg.len());
    println!(
        "  hidden buckets: {}",
        buckets.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
    );
    for combo in combos {
        println!("  {}", combo);
    }
}

fn cmd_kernels(input: Option<&str>) -> Result<(), String> {
    let filter = input.map(parse_dtype).transpose()?;
    let reg = fwd_registry();

    println!(
        "{:<20} {:>6}  {:<32} {:>4} {:>3} {:>3} {:>4} {:>5}",
        "key", "hidden", "types", "cpr", "wm", "wn", "ldgs", "smem"
    );
    println!("{}", "-".repeat(88));
    for key in reg.keys() {
        if filter.is_some_and(|dt| dt != key.types.input) {
            continue;
        }
        let Some(entry) = reg.get(&key) else { continue };
        let t = entry.traits;
        let bits = key.to_bits().map_err(|e| e.to_string())?;
        println!(
            "{:#020x} {:>6}  {:<32} {:>4} {:>3} {:>3} {:>4} {:>5}",
            bits,
            key.hidden_size,
            key.types.to_string(),
            t.ctas_per_row,
            t.warps_m,
            t.warps_n,
            t.ldgs(),
            t.smem_bytes_fwd(),
        );
    }
    Ok(())
}

struct RunOptions {
    rows: usize,
    cols: usize,
    dtype: Result<DType, String>,
    weight_dtype: Result<DType, String>,
    dropout: f32,
    eps: f32,
    residual: bool,
    residual_in_fp32: bool,
    rms: bool,
    seed: u64,
    json: bool,
}

fn random(shape: &[usize], dtype: DType) -> Result<Tensor, DispatchError> {
    Ok(Tensor::randn(shape).to_dtype(dtype)?)
}

fn summarize(values: &[f32]) -> (f32, f32) {
    let n = values.len().max(1) as f32;
    let mean = values.iter().sum::<f32>() / n;
    let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    (mean, max_abs)
}

fn cmd_run(runtime: &HostRuntime, opts: RunOptions) -> Result<(), String> {
    let itype = opts.dtype?;
    let wtype = opts.weight_dtype?;
    let (rows, cols) = (opts.rows, opts.cols);
    let err = |e: DispatchError| e.to_string();

    let x0 = random(&[rows, cols], itype).map_err(err)?;
    let gamma = Tensor::ones(&[cols]).to_dtype(wtype).map_err(|e| e.to_string())?;
    let beta = Tensor::zeros(&[cols], wtype);
    let residual_dtype = if opts.residual_in_fp32 { DType::F32 } else { itype };
    let residual = random(&[rows, cols], residual_dtype).map_err(err)?;
    let generator = Generator::new(opts.seed);

    let mut args = FwdArgs::new(&x0, &gamma)
        .beta(&beta)
        .dropout(opts.dropout)
        .epsilon(opts.eps)
        .generator(&generator)
        .residual_in_fp32(opts.residual_in_fp32)
        .rms_norm(opts.rms);
    if opts.residual {
        args = args.residual(&residual);
    }

    let start = Instant::now();
    let out = dropout_add_ln_fwd(runtime, args).map_err(err)?;
    let elapsed = start.elapsed();
    tracing::info!(rows, cols, elapsed_us = elapsed.as_micros() as u64, "forward complete");

    report(&out, rows, cols, elapsed.as_secs_f64(), opts.json).map_err(err)
}

fn report(out: &FwdOutputs, rows: usize, cols: usize, secs: f64, json: bool) -> Result<(), DispatchError> {
    let z = out.z.to_f32_vec()?;
    let mu = out.mu.to_f32_vec()?;
    let rsigma = out.rsigma.to_f32_vec()?;
    let (z_mean, z_max) = summarize(&z);
    let kept = match &out.dmask {
        Some(mask) => {
            let mask = mask.to_vec::<u8>()?;
            Some(mask.iter().filter(|&&m| m == 1).count() as f64 / mask.len().max(1) as f64)
        }
        None => None,
    };

    if json {
        let summary = serde_json::json!({
            "rows": rows,
            "cols": cols,
            "z_dtype": out.z.dtype().to_string(),
            "z_mean": z_mean,
            "z_max_abs": z_max,
            "mu": mu,
            "rsigma": rsigma,
            "saved_x": out.x.is_some(),
            "kept_fraction": kept,
            "elapsed_ms": secs * 1000.0,
        });
        println!("{}", summary);
        return Ok(());
    }

    println!("=== norma forward: {}x{} ===", rows, cols);
    println!("  z:        {} mean={:.4} max|z|={:.4}", out.z.dtype(), z_mean, z_max);
    println!("  saved x:  {}", if out.x.is_some() { "yes" } else { "no" });
    if let Some(kept) = kept {
        println!("  kept:     {:.3}", kept);
    }
    for (r, (m, s)) in mu.iter().zip(&rsigma).enumerate().take(8) {
        println!("  row {:<4} mu={:>9.5} rsigma={:>9.5}", r, m, s);
    }
    if rows > 8 {
        println!("  ... {} more rows", rows - 8);
    }
    println!("  time:     {:.3}ms", secs * 1000.0);
    Ok(())
}

fn time_it<T>(iters: usize, mut f: impl FnMut() -> Result<T, DispatchError>) -> Result<f64, String> {
    let start = Instant::now();
    for _ in 0..iters {
        std::hint::black_box(f().map_err(|e| e.to_string())?);
    }
    Ok(start.elapsed().as_secs_f64() / iters as f64)
}

fn cmd_bench(runtime: &HostRuntime, sizes_str: &str, rows: usize, dtype: Result<DType, String>) -> Result<(), String> {
    let itype = dtype?;
    let sizes: Vec<usize> = sizes_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    println!("=== norma fused forward ({} rows, {}) ===\n", rows, itype);
    println!("{:<10} {:>12} {:>12} {:>12}", "hidden", "LN (ms)", "LN+drop (ms)", "GB/s");
    println!("{}", "-".repeat(50));

    for &cols in &sizes {
        let x0 = random(&[rows, cols], itype).map_err(|e| e.to_string())?;
        let gamma = Tensor::ones(&[cols]);
        let iters = if cols <= 1024 { 20 } else { 5 };

        // Warmup
        dropout_add_ln_fwd(runtime, FwdArgs::new(&x0, &gamma)).map_err(|e| e.to_string())?;

        let ln_s = time_it(iters, || dropout_add_ln_fwd(runtime, FwdArgs::new(&x0, &gamma)))?;
        let drop_s = time_it(iters, || {
            dropout_add_ln_fwd(runtime, FwdArgs::new(&x0, &gamma).dropout(0.1))
        })?;
        let bytes = (2 * rows * cols * itype.element_size()) as f64;

        println!(
            "{:<10} {:>10.3}ms {:>10.3}ms {:>12.2}",
            cols,
            ln_s * 1000.0,
            drop_s * 1000.0,
            bytes / ln_s / 1e9,
        );
    }
    Ok(())
}
