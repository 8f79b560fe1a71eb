//! Routing simulation against mock devices.

use std::sync::Arc;

use audiohal_config::KeyValuePairs;
use audiohal_route::{Direction, MockDeviceFactory, RouteManager, Stream};
use clap::Args;

use super::common::{load_topology, parse_key_val, parse_pairs};

/// Route a set of streams through a topology and report the result.
#[derive(Args)]
pub struct RouteArgs {
    /// Topology file path or name
    pub topology: String,

    /// Playback stream, e.g. "sample_rate=44100;format=pcm16;output_flags=8"
    #[arg(long = "output", value_parser = parse_pairs)]
    pub outputs: Vec<KeyValuePairs>,

    /// Capture stream, e.g. "sample_rate=16000;channels=1"
    #[arg(long = "input", value_parser = parse_pairs)]
    pub inputs: Vec<KeyValuePairs>,

    /// Criterion value set before routing (Name=Literal)
    #[arg(short, long = "criterion", value_parser = parse_key_val)]
    pub criteria: Vec<(String, String)>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Run the route command.
pub fn run(args: RouteArgs) -> anyhow::Result<()> {
    let topology = load_topology(&args.topology)?;
    let manager = topology.build(Box::new(MockDeviceFactory::new()))?;
    manager.start_service()?;

    let mut streams = Vec::new();
    for (direction, blobs) in [
        (Direction::Output, &args.outputs),
        (Direction::Input, &args.inputs),
    ] {
        for pairs in blobs {
            let stream = manager.add_stream(direction, pairs.stream_config(direction)?);
            manager.start_stream(stream.id())?;
            streams.push(stream);
        }
    }
    for (name, literal) in &args.criteria {
        manager.set_audio_criterion(name, literal)?;
    }

    let outcome = manager.reconsider_routing();
    if let Err(e) = &outcome {
        tracing::warn!("routing cycle failed: {e}");
    }

    if args.json {
        print_json(&manager, &streams)?;
    } else {
        print_text(&manager, &streams)?;
    }
    outcome.map_err(anyhow::Error::from)
}

fn print_text(manager: &RouteManager, streams: &[Arc<Stream>]) -> anyhow::Result<()> {
    println!("Streams:");
    for stream in streams {
        println!(
            "  {} {} {}",
            stream.id(),
            stream.direction(),
            stream.spec()
        );
        match (stream.route(), stream.route_spec()) {
            (Some(_), Some(spec)) => {
                let key = route_key_of(manager, stream);
                println!("    route:    {key} at {spec}");
                let stages = stream.pipeline_stages();
                if stages.is_empty() {
                    println!("    pipeline: passthrough");
                } else {
                    println!("    pipeline: {}", stages.join(", "));
                }
                println!(
                    "    latency:  {} us (period {} us)",
                    manager.latency_us(stream.id())?,
                    manager.period_us(stream.id())?
                );
            }
            _ => println!("    route:    none"),
        }
    }
    println!();

    let snapshot = manager.snapshot();
    println!("Ports:");
    for port in &snapshot.ports {
        let state = match (port.active, port.blocked) {
            (true, _) => "active",
            (false, true) => "blocked",
            (false, false) => "idle",
        };
        println!("  {:16} {state}", port.name);
    }
    println!();

    println!("Criteria:");
    for (name, value) in &snapshot.criteria {
        println!("  {name:24} = {value}");
    }
    Ok(())
}

fn print_json(manager: &RouteManager, streams: &[Arc<Stream>]) -> anyhow::Result<()> {
    let snapshot = manager.snapshot();
    let mut stream_json = Vec::new();
    for stream in streams {
        let routed = stream.route().is_some();
        stream_json.push(serde_json::json!({
            "id": stream.id().index(),
            "direction": stream.direction().to_string(),
            "spec": stream.spec().to_string(),
            "route": routed.then(|| route_key_of(manager, stream)),
            "route_spec": stream.route_spec().map(|s| s.to_string()),
            "pipeline": stream.pipeline_stages(),
            "latency_us": manager.latency_us(stream.id())?,
        }));
    }
    let json = serde_json::json!({
        "streams": stream_json,
        "ports": snapshot.ports.iter().map(|p| serde_json::json!({
            "name": p.name,
            "active": p.active,
            "blocked": p.blocked,
        })).collect::<Vec<_>>(),
        "criteria": snapshot.criteria.iter().map(|(name, value)| serde_json::json!({
            "name": name,
            "value": value,
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn route_key_of(manager: &RouteManager, stream: &Stream) -> String {
    manager
        .snapshot()
        .streams
        .into_iter()
        .find(|s| s.id == stream.id())
        .and_then(|s| s.route)
        .unwrap_or_default()
}
