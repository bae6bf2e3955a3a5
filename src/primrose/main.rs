// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
//
// primrose prepares park-and-ride transfer points for the trip planner:
// classify stops against parking layers, reduce the flagged set to cluster
// representatives, splice those into the street/rail graph.

use anyhow::{Context, Result};
use clap::Parser;
use parkride::clustering::{self, ClusterStrategy, ReducerConfig};
use parkride::geometry::project_geometry;
use parkride::models::{Candidate, ParkingFacility, ParkingKind, Stop};
use parkride::snap::{self, SnapConfig};
use parkride::street_graph::StreetGraph;
use parkride::transfer::{self, ClassifierConfig};
use std::path::{Path, PathBuf};

mod export;
mod gtfs_candidates;
mod loaders;

use gtfs_candidates::CandidateFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum StrategyArg {
    Medoid,
    Centroid,
}

impl From<StrategyArg> for ClusterStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Medoid => ClusterStrategy::Medoid,
            StrategyArg::Centroid => ClusterStrategy::Centroid,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract transfer-stop candidates from a GTFS feed
    Extract {
        #[arg(long)]
        gtfs: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Extra station name patterns to include (repeatable)
        #[arg(long)]
        name_pattern: Vec<String>,
    },
    /// Flag stops with parking infrastructure within reach
    Classify {
        #[arg(long)]
        stops: PathBuf,
        #[arg(long)]
        structures: PathBuf,
        #[arg(long)]
        lots: PathBuf,
        /// Transfer stops GeoJSON output
        #[arg(long)]
        output: PathBuf,
        /// Optional candidate table for the reduce step
        #[arg(long)]
        candidates: Option<PathBuf>,
        #[arg(long, default_value_t = transfer::PARKING_DISTANCE_THRESHOLD_M)]
        threshold_m: f64,
    },
    /// Reduce a candidate table to cluster representatives
    Reduce {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Optional candidate -> representative table
        #[arg(long)]
        assignment: Option<PathBuf>,
        #[arg(long, default_value_t = clustering::BASE_NUM_CLUSTERS)]
        min_k: usize,
        #[arg(long, value_enum, default_value = "medoid")]
        strategy: StrategyArg,
    },
    /// Splice representative stops into the street graph
    Snap {
        /// Graph input: .bin (bincode) or .geojson edge layer
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        stops: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Optional GeoJSON export of the mutated graph
        #[arg(long)]
        geojson: Option<PathBuf>,
        #[arg(long, default_value_t = snap::SNAP_DISTANCE_THRESHOLD_M)]
        threshold_m: f64,
    },
    /// Full pipeline: classify, reduce, snap
    Run {
        #[arg(long)]
        stops: PathBuf,
        #[arg(long)]
        structures: PathBuf,
        #[arg(long)]
        lots: PathBuf,
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value = "medoid")]
        strategy: StrategyArg,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Commands::Extract {
            gtfs,
            output,
            name_pattern,
        } => {
            let feed = gtfs_structures::Gtfs::new(
                gtfs.to_str().context("GTFS path is not valid UTF-8")?,
            )
            .map_err(|e| anyhow::anyhow!("Failed to load GTFS feed: {e}"))?;
            let filter = CandidateFilter {
                name_patterns: name_pattern,
                ..CandidateFilter::default()
            };
            let (candidates, skipped) = gtfs_candidates::extract_candidates(&feed, &filter);
            export::write_candidates_csv(&candidates, &output)?;
            println!(
                "Extracted {} candidates ({} skipped) to {}",
                candidates.len(),
                skipped,
                output.display()
            );
        }
        Commands::Classify {
            stops,
            structures,
            lots,
            output,
            candidates,
            threshold_m,
        } => {
            let classified = classify(&stops, &structures, &lots, threshold_m)?;
            export::write_transfer_stops_geojson(&classified, &output)?;
            if let Some(path) = candidates {
                export::write_candidates_csv(&to_candidates(&classified), &path)?;
            }
            println!(
                "Flagged {} of {} stops as transfer stops",
                classified.iter().filter(|s| s.is_transfer()).count(),
                classified.len()
            );
        }
        Commands::Reduce {
            candidates,
            output,
            assignment,
            min_k,
            strategy,
        } => {
            let table = loaders::read_candidates_csv(&candidates)?;
            let reduction = reduce(&table, min_k, strategy.into());
            export::write_candidates_csv(&reduction.representatives, &output)?;
            if let Some(path) = assignment {
                export::write_assignment_csv(&reduction.assignment, &path)?;
            }
        }
        Commands::Snap {
            graph,
            stops,
            output,
            geojson,
            threshold_m,
        } => {
            let mut street_graph = load_graph(&graph)?;
            let representatives = loaders::read_candidates_csv(&stops)?;
            let config = SnapConfig {
                threshold_m,
                ..SnapConfig::default()
            };
            let outcome = snap::snap_all(&representatives, &mut street_graph, &config);
            street_graph.save(&output).context("Failed to save graph")?;
            if let Some(path) = geojson {
                export::write_graph_geojson(&street_graph, &path)?;
            }
            report_snap(&outcome);
        }
        Commands::Run {
            stops,
            structures,
            lots,
            graph,
            output,
            strategy,
        } => {
            std::fs::create_dir_all(&output).context("Failed to create output dir")?;

            let classified = classify(
                &stops,
                &structures,
                &lots,
                transfer::PARKING_DISTANCE_THRESHOLD_M,
            )?;
            export::write_transfer_stops_geojson(&classified, &output.join("transferStops.geojson"))?;
            let candidates = to_candidates(&classified);
            println!(
                "Flagged {} of {} stops as transfer stops",
                candidates.len(),
                classified.len()
            );

            let reduction = reduce(&candidates, clustering::BASE_NUM_CLUSTERS, strategy.into());
            export::write_candidates_csv(
                &reduction.representatives,
                &output.join("candidatesClusters.csv"),
            )?;
            export::write_assignment_csv(&reduction.assignment, &output.join("assignment.csv"))?;

            let mut street_graph = load_graph(&graph)?;
            let outcome = snap::snap_all(
                &reduction.representatives,
                &mut street_graph,
                &SnapConfig::default(),
            );
            street_graph
                .save(&output.join("network.bin"))
                .context("Failed to save graph")?;
            export::write_graph_geojson(&street_graph, &output.join("network.geojson"))?;
            report_snap(&outcome);
        }
    }

    Ok(())
}

/// Load, project and classify the stop and parking layers.
/// Returns stops in geographic coordinates with associations attached.
fn classify(
    stops_path: &Path,
    structures_path: &Path,
    lots_path: &Path,
    threshold_m: f64,
) -> Result<Vec<Stop>> {
    let (stops, skipped_stops) = loaders::load_stops_geojson(stops_path)?;
    let (structures, skipped_structures) =
        loaders::load_parking_geojson(structures_path, ParkingKind::Structure)?;
    let (lots, skipped_lots) = loaders::load_parking_geojson(lots_path, ParkingKind::Lot)?;
    if skipped_stops + skipped_structures + skipped_lots > 0 {
        println!(
            "Skipped {} stop / {} structure / {} lot features during load",
            skipped_stops, skipped_structures, skipped_lots
        );
    }

    let projected_stops: Vec<Stop> = stops.iter().map(loaders::project_stop).collect();
    let mut dropped_facilities = 0usize;
    let mut project_facilities = |facilities: Vec<ParkingFacility>| -> Vec<ParkingFacility> {
        facilities
            .into_iter()
            .filter_map(|mut f| match project_geometry(&f.geometry) {
                Some(projected) => {
                    f.geometry = projected;
                    Some(f)
                }
                None => {
                    dropped_facilities += 1;
                    None
                }
            })
            .collect()
    };
    let structures = project_facilities(structures);
    let lots = project_facilities(lots);
    if dropped_facilities > 0 {
        tracing::warn!(count = dropped_facilities, "facilities dropped during reprojection");
    }

    let config = ClassifierConfig { threshold_m };
    let outcome = transfer::classify_stops(projected_stops, &structures, &lots, &config);

    // The classifier worked on projected copies; carry its findings back
    // onto the geographic stops, order is preserved.
    let enriched = stops
        .into_iter()
        .zip(outcome.stops)
        .map(|(mut stop, projected)| {
            stop.transfer_parking = projected.transfer_parking;
            stop
        })
        .collect();
    Ok(enriched)
}

fn to_candidates(stops: &[Stop]) -> Vec<Candidate> {
    stops
        .iter()
        .filter(|s| s.is_transfer())
        .map(|s| Candidate {
            stop_id: s.stop_id.clone(),
            name: s.name.clone(),
            lat: s.point.y(),
            lon: s.point.x(),
        })
        .collect()
}

fn reduce(candidates: &[Candidate], min_k: usize, strategy: ClusterStrategy) -> clustering::Reduction {
    let config = ReducerConfig { min_k, strategy };
    let reduction = clustering::reduce(candidates, &config);
    if let Some(model) = &reduction.chosen {
        println!(
            "Selected k={} (Davies-Bouldin {:.4}) out of {} evaluated runs; {} representatives",
            model.k,
            model.score,
            reduction.evaluated.len(),
            reduction.representatives.len()
        );
    } else {
        println!("No candidates to cluster");
    }
    reduction
}

fn load_graph(path: &Path) -> Result<StreetGraph> {
    let is_geojson = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"));
    if is_geojson {
        let (graph, skipped) = loaders::load_graph_geojson(path)?;
        if skipped > 0 {
            println!("Skipped {} unusable edge features", skipped);
        }
        Ok(graph)
    } else {
        StreetGraph::load(path).with_context(|| format!("Failed to load graph {}", path.display()))
    }
}

fn report_snap(outcome: &snap::SnapOutcome) {
    println!(
        "Snapped {} stops into the network, {} left unmatched",
        outcome.snapped,
        outcome.unmatched.len()
    );
    for stop_id in &outcome.unmatched {
        println!("  no edge within reach of stop {}", stop_id);
    }
}
