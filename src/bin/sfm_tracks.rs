use clap::{Parser, Subcommand};
use incremental_sfm::config::SfmConfig;
use incremental_sfm::feature::FeatureArena;
use incremental_sfm::io::{load_image_features, load_tracks, object_from_json, save_tracks};
use incremental_sfm::keyframes::{select_efficient_image_order, select_keyframes};
use incremental_sfm::matching::TrackBuilder;
use incremental_sfm::sequence::ImageSequence;
use indicatif::ProgressIterator;
use log::{info, warn};
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match consecutive images and build the track graph
    Match {
        /// Folder with one feature JSON per image
        #[arg(short, long)]
        input: String,

        /// Output tracks file
        #[arg(short, long, default_value = "tracks.json")]
        output: String,

        /// Configuration JSON
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Select keyframes from a tracks file
    Keyframes {
        /// Tracks file written by `match`
        #[arg(short, long)]
        tracks: String,

        /// Configuration JSON
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> Result<SfmConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(p) => object_from_json(p)?,
        None => SfmConfig::default(),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Match {
            input,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            build_tracks(&input, &output, &config)?;
        }
        Commands::Keyframes { tracks, config } => {
            let config = load_config(config.as_deref())?;
            keyframes(&tracks, &config)?;
        }
    }

    Ok(())
}

fn build_tracks(input: &str, output: &str, config: &SfmConfig) -> Result<(), Box<dyn std::error::Error>> {
    let now = Instant::now();
    let images = load_image_features(input)?;
    let mut arena = FeatureArena::new();
    let keypoints: Vec<_> = images.iter().map(|f| f.register(&mut arena)).collect();

    let mut builder = TrackBuilder::new(config.matching.min_pair_matches);
    for i in (1..images.len()).progress_count(images.len().saturating_sub(1) as u64) {
        let (a, b) = (images[i - 1].image, images[i].image);
        let merged = builder.match_and_add(a, &keypoints[i - 1], b, &keypoints[i], &config.matching)?;
        if merged == 0 {
            warn!("no matches kept between {} and {}", a, b);
        }
    }

    let graph = builder.into_graph();
    info!(
        "{} images, {} tracks, {} edges in {:.3} sec",
        graph.num_images(),
        graph.num_tracks(),
        graph.num_edges(),
        now.elapsed().as_secs_f64()
    );
    save_tracks(output, &graph, &arena)?;
    Ok(())
}

fn keyframes(tracks: &str, config: &SfmConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (graph, _) = load_tracks(tracks)?;
    let sequence = ImageSequence::from_graph(&graph);
    let keyframes = select_keyframes(&graph, &sequence, &config.keyframes);
    info!("{} keyframes out of {} images", keyframes.len(), sequence.len());
    let partitions = select_efficient_image_order(&graph, &sequence);
    info!("{} image partitions", partitions.len());
    let result = serde_json::json!({
        "keyframes": keyframes,
        "partitions": partitions,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
