use std::path::PathBuf;
use std::process;

use convis::dataset::{self, Dataset};
use convis::model::TinyConvNet;
use convis::observer::DiagramAdapter;
use convis::{AppConfig, FrameScheduler, LayoutBuilder, Scene, Stage};

struct Options {
    command: String,
    ticks: usize,
    mnist: Option<PathBuf>,
    config: Option<PathBuf>,
    calibrate: bool,
    json: bool,
    without: Vec<Stage>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        command: "run".to_string(),
        ticks: 10,
        mnist: None,
        config: None,
        calibrate: false,
        json: false,
        without: Vec::new(),
    };
    let mut positional = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| args.get(i + 1).cloned().ok_or(format!("{} needs a value", args[i]));
        match args[i].as_str() {
            "--mnist" => {
                opts.mnist = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--config" => {
                opts.config = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--without" => {
                let name = value(i)?;
                let stage = Stage::from_name(&name).ok_or(format!("unknown stage: {name}"))?;
                opts.without.push(stage);
                i += 1;
            }
            "--calibrate" => opts.calibrate = true,
            "--json" => opts.json = true,
            other if other.starts_with("--") => return Err(format!("unknown flag: {other}")),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }
    if let Some(cmd) = positional.first() {
        opts.command = cmd.clone();
    }
    if let Some(n) = positional.get(1) {
        opts.ticks = n.parse().map_err(|_| format!("invalid tick count: {n}"))?;
    }
    Ok(opts)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h" || a == "help") {
        print_help();
        return Ok(());
    }
    let opts = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{e}");
            print_help();
            process::exit(2);
        }
    };

    tracing_subscriber::fmt::init();

    let config = match &opts.config {
        Some(path) => AppConfig::load_or_default(path)?,
        None => AppConfig::default(),
    };

    match opts.command.as_str() {
        "layout" => run_layout(&config, &opts),
        "run" => run_frames(&config, &opts),
        "config" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            process::exit(2);
        }
    }
}

fn build(config: &AppConfig, opts: &Options) -> Result<(convis::Diagram, Scene), Box<dyn std::error::Error>> {
    let mut scene = Scene::new();
    let mut builder = LayoutBuilder::new(config.render.clone());
    for &stage in &opts.without {
        builder = builder.without(stage);
    }
    let diagram = builder.build(&mut scene)?;
    Ok((diagram, scene))
}

fn run_layout(config: &AppConfig, opts: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let (diagram, scene) = build(config, opts)?;
    if opts.json {
        let snap = DiagramAdapter::new(&diagram, &scene).snapshot();
        println!("{}", serde_json::to_string_pretty(&snap)?);
        return Ok(());
    }

    println!("items: {}", scene.len());
    if let Some(b) = scene.bounds() {
        println!("bounds: {:.0}x{:.0} at ({:.0}, {:.0})", b.w, b.h, b.x, b.y);
    }
    for stage in Stage::ALL {
        let keys = diagram.registry().stage_keys(stage);
        let roles: Vec<String> = keys.iter().map(|k| k.role.to_string()).collect();
        println!("{:<10} {:>2} slot(s) {}", stage.name(), keys.len(), roles.join(" "));
    }
    let missing = diagram.missing_keys();
    if !missing.is_empty() {
        println!("missing: {}", missing.len());
    }
    Ok(())
}

fn run_frames(config: &AppConfig, opts: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let [_, h, w] = config.render.input_dims;
    let data = dataset::load_or_synthesize(opts.mnist.as_deref(), config.sample_limit, config.seed);
    let mut model = TinyConvNet::new(h, w, config.seed);
    if opts.calibrate {
        model.calibrate(&data, data.len());
    }
    let (diagram, mut scene) = build(config, opts)?;

    let mut scheduler = FrameScheduler::new(&config.scheduler);
    scheduler.start(std::time::Duration::ZERO);

    let mut correct = 0usize;
    let mut ticks = 0usize;
    while ticks < opts.ticks {
        // Virtual clock: jump straight to the next deadline.
        let Some(now) = scheduler.next_deadline() else {
            break;
        };
        let Some(report) = scheduler.poll(now, &model, &data, &diagram, &mut scene) else {
            continue;
        };
        ticks += 1;
        if report.frame.correct() == Some(true) {
            correct += 1;
        }
        if !opts.json {
            println!("#{:<4} sample {:<5} {}", report.tick, report.index, report.frame);
        }
    }

    if opts.json {
        let snap = DiagramAdapter::new(&diagram, &scene).snapshot();
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        println!(
            "{} frame(s) over {} sample(s), {} correct",
            ticks,
            data.len(),
            correct
        );
    }
    Ok(())
}

fn print_help() {
    println!("convis (live CNN forward-pass diagram, headless)");
    println!("usage:");
    println!("  cargo run -- run [N]        drive N frames on a virtual clock");
    println!("  cargo run -- layout         build the diagram and list its slots");
    println!("  cargo run -- config         print the effective configuration");
    println!("  cargo run -- --help");
    println!("flags:");
    println!("  --mnist DIR      load train-*-ubyte files from DIR");
    println!("  --config PATH    read configuration JSON");
    println!("  --without STAGE  leave a stage's slots unregistered");
    println!("  --calibrate      fit the dense layer to the loaded samples");
    println!("  --json           print a JSON snapshot of the slots");
}
