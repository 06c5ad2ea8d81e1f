//! Binary entrypoint for cutout-studio.
//!
//! A headless front end over the library: cut masks into layers, hit-test a
//! saved stack, or crop an image.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use cutout_studio::config::Configuration;
use cutout_studio::crop::{PixelRect, crop};
use cutout_studio::hit_test::{PercentPoint, hit_test};
use cutout_studio::loader::ImageCache;
use cutout_studio::scan::collect_masks;
use cutout_studio::session::EditorSession;
use cutout_studio::stack::LayerStack;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "cutout-studio", about = "Layer cut-outs from segmentation masks")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Cut a base image along one or more masks and write the layer stack
    Segment {
        /// Base image reference (path, file:// or data: URI)
        #[arg(long)]
        base: String,
        /// Mask image reference, in service output order (repeatable)
        #[arg(long = "mask", value_name = "REF")]
        masks: Vec<String>,
        /// Directory of mask images, taken in file-name order
        #[arg(long, value_name = "DIR", conflicts_with = "masks")]
        mask_dir: Option<PathBuf>,
        /// Where to write the serialized layers (stdout when omitted)
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Print the id of the topmost layer under a point, or `none`
    Hit {
        /// Serialized layer stack
        #[arg(long, value_name = "FILE")]
        layers: PathBuf,
        #[command(flatten)]
        point: PointArgs,
    },
    /// Crop an image to a pixel rectangle and write it as PNG
    Crop {
        #[arg(long)]
        input: String,
        #[command(flatten)]
        rect: RectArgs,
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
    },
}

#[derive(Debug, Args)]
struct PointArgs {
    /// Horizontal position in percent of the canvas
    #[arg(long)]
    x: f64,
    /// Vertical position in percent of the canvas
    #[arg(long)]
    y: f64,
    /// Canvas width in pixels
    #[arg(long)]
    width: u32,
    /// Canvas height in pixels
    #[arg(long)]
    height: u32,
}

#[derive(Debug, Args)]
struct RectArgs {
    #[arg(long)]
    x: u32,
    #[arg(long)]
    y: u32,
    #[arg(long)]
    width: u32,
    #[arg(long)]
    height: u32,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter =
        EnvFilter::from_default_env().add_directive(format!("cutout_studio={level}").parse()?);
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Configuration> {
    let cfg = match path {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Configuration::default(),
    };
    cfg.validated().context("validating configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Segment {
            base,
            masks,
            mask_dir,
            out,
        } => {
            let masks = match mask_dir {
                Some(dir) => collect_masks(&dir)
                    .with_context(|| format!("scanning masks in {}", dir.display()))?
                    .into_iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect(),
                None => masks,
            };
            if masks.is_empty() {
                bail!("no masks given; pass --mask or --mask-dir");
            }

            let mut session = EditorSession::new(cfg);
            session.open_image(base);
            let leftover = session
                .segment(&masks)
                .await
                .context("cutting out masks")?;
            for skipped in &leftover.skipped {
                warn!(index = skipped.index, error = %skipped.error, "mask skipped");
            }
            info!(layers = session.stack().len(), "segmentation finished");

            let json = session.save_layers().context("serializing layers")?;
            match out {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing layers to {}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Command::Hit { layers, point } => {
            let text = std::fs::read_to_string(&layers)
                .with_context(|| format!("reading layers from {}", layers.display()))?;
            let stack = LayerStack::from_json(&text).context("parsing layers")?;
            let cache = ImageCache::new(&cfg);
            let hit = hit_test(
                stack.layers(),
                PercentPoint::new(point.x, point.y),
                (point.width, point.height),
                &cache,
            )
            .await;
            match hit {
                Some(id) => println!("{id}"),
                None => println!("none"),
            }
        }
        Command::Crop { input, rect, out } => {
            let cache = ImageCache::new(&cfg);
            let surface = cache
                .load(&input)
                .await
                .context("loading crop input")?;
            let rect = PixelRect::new(rect.x, rect.y, rect.width, rect.height);
            let cropped = crop(&surface, rect, cfg.crop_policy).context("cropping")?;
            let png = cropped.to_png_bytes().context("encoding PNG")?;
            std::fs::write(&out, png)
                .with_context(|| format!("writing {}", out.display()))?;
            info!(width = cropped.width(), height = cropped.height(), "cropped");
        }
    }
    Ok(())
}
