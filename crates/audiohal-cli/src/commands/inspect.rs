//! Topology inspection.

use audiohal_config::Topology;
use audiohal_route::MockDeviceFactory;
use clap::Args;

use super::common::load_topology;

/// Show the contents of a topology file.
#[derive(Args)]
pub struct InspectArgs {
    /// Topology file path or name
    pub topology: String,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Run the inspect command.
pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let topology = load_topology(&args.topology)?;
    let manager = topology.build(Box::new(MockDeviceFactory::new()))?;
    manager.start_service()?;
    let snapshot = manager.snapshot();

    if args.json {
        let json = serde_json::json!({
            "name": topology.name,
            "ports": topology.ports.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "groups": topology.groups.iter().map(|g| serde_json::json!({
                "name": g.name,
                "ports": g.ports,
            })).collect::<Vec<_>>(),
            "routes": topology.routes.iter().map(|r| serde_json::json!({
                "key": r.key(),
                "src": r.src,
                "dst": r.dst,
                "stream": r.stream.is_some(),
                "rules": r.rules.iter().map(|rule| format!("{} in [{}]", rule.criterion, rule.values.join(", "))).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "criteria": snapshot.criteria.iter().map(|(name, value)| serde_json::json!({
                "name": name,
                "value": value,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    print_text(&topology, &snapshot.criteria);
    Ok(())
}

fn print_text(topology: &Topology, criteria: &[(String, String)]) {
    let title = topology.name.as_deref().unwrap_or("(unnamed)");
    println!("Topology: {title}");
    println!();

    println!("Ports ({}):", topology.ports.len());
    for port in &topology.ports {
        let groups: Vec<&str> = topology
            .groups
            .iter()
            .filter(|g| g.ports.contains(&port.name))
            .map(|g| g.name.as_str())
            .collect();
        if groups.is_empty() {
            println!("  {}", port.name);
        } else {
            println!("  {:16} excludes via {}", port.name, groups.join(", "));
        }
    }
    println!();

    println!("Routes ({}):", topology.routes.len());
    for route in &topology.routes {
        let kind = if route.stream.is_some() { "stream" } else { "path" };
        println!(
            "  {:24} {:6} {} -> {}",
            route.key(),
            kind,
            route.src.as_deref().unwrap_or("-"),
            route.dst.as_deref().unwrap_or("-")
        );
        for rule in &route.rules {
            println!("      when {} in [{}]", rule.criterion, rule.values.join(", "));
        }
    }
    println!();

    println!("Criteria:");
    for (name, value) in criteria {
        println!("  {name:24} = {value}");
    }
}
