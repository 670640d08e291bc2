use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use qconv::attr::{EltwiseAlg, PostOp};
use qconv::conv::{create_best, create_primitive, variants, Activation, ConvPrimitive};
use qconv::problem::{random_data, Problem, ProblemSet};
use qconv::reference::{self, RefParams};
use qconv::{Attr, CpuIsa, DataType, Event, OutputScales};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "qconv", version, about = "Run and verify quantized int8 convolutions")]
struct Args {
    /// Problem descriptor, e.g. mb2ic16ih14oc32kh3ph1 (repeatable)
    #[arg(long)]
    problem: Vec<String>,

    /// JSON file with {"problems": [...]}
    #[arg(long)]
    batch: Option<PathBuf>,

    /// Source data type: u8 or s8
    #[arg(long, default_value = "u8")]
    src: DataType,

    /// Destination data type: f32, s32, s8 or u8
    #[arg(long, default_value = "u8")]
    dst: DataType,

    /// Bias data type, or 'none'
    #[arg(long, default_value = "none")]
    bias: String,

    /// Fuse a leaky relu into the convolution
    #[arg(long, default_value_t = false)]
    relu: bool,

    /// Negative slope of the fused relu
    #[arg(long, default_value_t = 0.0)]
    negative_slope: f32,

    /// Output scale (base value when per-channel)
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Use one output scale per channel
    #[arg(long, default_value_t = false)]
    per_channel: bool,

    /// Append a sum post-op with this scale
    #[arg(long)]
    sum: Option<f32>,

    /// Append an eltwise relu post-op with this alpha
    #[arg(long)]
    eltwise_relu: Option<f32>,

    /// ISA tier: auto, avx2 or sse42
    #[arg(long, default_value = "auto")]
    isa: String,

    /// Timed iterations per problem
    #[arg(long, default_value_t = 10)]
    iters: u64,

    /// Worker threads (0 = all cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Seed for input generation
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Compare against the reference convolution
    #[arg(long, default_value_t = false)]
    check: bool,

    /// Print a JSON report instead of one line per problem
    #[arg(long, default_value_t = false)]
    json: bool,

    /// List every primitive variant and exit
    #[arg(long, default_value_t = false)]
    list: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    problem: String,
    implementation: Option<String>,
    status: String,
    avg_ms: Option<f64>,
    gops: Option<f64>,
    max_diff: Option<f32>,
    passed: Option<bool>,
}

fn build_attr(args: &Args, oc: usize) -> Attr {
    let scales = if args.per_channel {
        OutputScales::per_channel((0..oc).map(|i| args.scale * (1 + i % 4) as f32 / 4.0).collect())
    } else {
        OutputScales::per_tensor(args.scale)
    };
    let mut attr = Attr::default().with_output_scales(scales).with_negative_slope(args.negative_slope);
    if let Some(s) = args.sum { attr = attr.with_post_op(PostOp::Sum { scale: s }); }
    if let Some(a) = args.eltwise_relu { attr = attr.with_post_op(PostOp::Eltwise { alg: EltwiseAlg::Relu, alpha: a }); }
    attr
}

fn collect_problems(args: &Args) -> Result<Vec<Problem>> {
    let mut out = Vec::new();
    for s in &args.problem { out.push(s.parse::<Problem>().with_context(|| format!("parse problem '{}'", s))?); }
    if let Some(path) = &args.batch { out.extend(ProblemSet::load(path)?.problems); }
    if out.is_empty() { bail!("no problems given; use --problem or --batch"); }
    Ok(out)
}

fn run_problem(args: &Args, p: &Problem, bias_dt: Option<DataType>) -> Result<Report> {
    let desc = p.conv_desc(args.src, args.dst, bias_dt)?;
    let attr = build_attr(args, p.oc);
    let activation = if args.relu { Activation::Relu } else { Activation::None };
    let created = match args.isa.as_str() {
        "auto" => create_best(activation, &desc, &attr),
        name => create_primitive(name.parse::<CpuIsa>()?, activation, &desc, &attr),
    };
    let prim: Box<dyn ConvPrimitive> = match created {
        Ok(prim) => prim,
        Err(e) if e.is_unimplemented() => {
            warn!("{}: {}", p, e);
            return Ok(Report { problem: p.to_string(), implementation: None, status: e.to_string(), avg_ms: None, gops: None, max_diff: None, passed: None });
        }
        Err(e) => return Err(e.into()),
    };
    info!("{}: using {}", p, prim.name());
    let data = random_data(&desc, args.seed)?;

    let (max_diff, passed) = if args.check {
        let mut dst = data.dst.clone();
        let event = Event::new();
        let mut exec = prim.bind(&data.src, &data.weights, data.bias.as_ref(), &mut dst)?;
        prim.execute(&mut exec, &event);
        let params = RefParams { with_relu: args.relu, wei_adj_scale: prim.conf().wei_adj_scale };
        let expected = reference::conv_fwd(&desc, &attr, params, &data.src, &data.weights, data.bias.as_ref(), &data.dst);
        let diff = reference::max_abs_diff(&dst.to_f32_vec(), &expected);
        let tol = if args.dst == DataType::F32 { 1e-2 } else { 1.0 };
        (Some(diff), Some(diff <= tol))
    } else {
        (None, None)
    };

    let mut dst = data.dst.clone();
    let pb = ProgressBar::new(args.iters);
    pb.set_style(ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")?);
    pb.set_message(p.to_string());
    let t0 = Instant::now();
    for _ in 0..args.iters {
        let event = Event::new();
        let mut exec = prim.bind(&data.src, &data.weights, data.bias.as_ref(), &mut dst)?;
        prim.execute(&mut exec, &event);
        event.wait();
        pb.inc(1);
    }
    pb.finish_and_clear();
    let dt = t0.elapsed().as_secs_f64();
    let avg = if args.iters > 0 { dt / args.iters as f64 } else { 0.0 };
    let gops = if avg > 0.0 { Some(2.0 * p.ops() as f64 / avg / 1e9) } else { None };
    let status = match passed { Some(false) => "mismatch", _ => "ok" }.to_string();
    Ok(Report { problem: p.to_string(), implementation: Some(prim.name()), status, avg_ms: Some(avg * 1e3), gops, max_diff, passed })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    if args.list {
        for k in variants() { println!("jit:{} {:?} {} -> {}", k.isa, k.activation, k.src, k.dst); }
        return Ok(());
    }
    let bias_dt = match args.bias.as_str() {
        "none" => None,
        s => Some(s.parse::<DataType>()?),
    };
    let problems = collect_problems(&args)?;
    let pool = rayon::ThreadPoolBuilder::new().num_threads(args.threads).build().context("thread pool")?;

    let mut reports = Vec::with_capacity(problems.len());
    for p in &problems {
        let r = pool.install(|| run_problem(&args, p, bias_dt))?;
        if !args.json {
            println!(
                "{} impl={} status={} avg_ms={:.3} gops={:.2} max_diff={}",
                r.problem,
                r.implementation.as_deref().unwrap_or("(none)"),
                r.status,
                r.avg_ms.unwrap_or(0.0),
                r.gops.unwrap_or(0.0),
                r.max_diff.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }
        reports.push(r);
    }
    if args.json { println!("{}", serde_json::to_string_pretty(&reports)?); }
    let failures = reports.iter().filter(|r| r.passed == Some(false)).count();
    if failures > 0 { bail!("{} problem(s) failed verification", failures); }
    Ok(())
}
