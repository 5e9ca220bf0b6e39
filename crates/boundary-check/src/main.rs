use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use cargo_metadata::{Metadata, MetadataCommand, PackageId};

/// Gate decisions and the redirect contract stay pure: no runtime, no HTTP stack.
const BOUNDARIES: &[(&str, &[&str])] = &[
    (
        "agegate-policy",
        &[
            "agegate-gateway",
            "agegate-auth",
            "axum",
            "hyper",
            "reqwest",
            "tokio",
        ],
    ),
    (
        "agegate-contracts",
        &[
            "agegate-gateway",
            "agegate-auth",
            "agegate-policy",
            "axum",
            "hyper",
            "reqwest",
            "tokio",
        ],
    ),
];

fn main() -> Result<()> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("failed to run `cargo metadata`")?;

    let mut failed = false;
    for (package, forbidden) in BOUNDARIES {
        let violations = forbidden_reachable(&metadata, package, forbidden)?;
        if violations.is_empty() {
            println!(
                "OK: `{}` has no dependency edge to {}",
                package,
                forbidden.join(", ")
            );
        } else {
            eprintln!(
                "FAIL: `{}` depends on forbidden crate(s): {}",
                package,
                violations.join(", ")
            );
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }

    Ok(())
}

fn forbidden_reachable(
    metadata: &Metadata,
    package_name: &str,
    forbidden: &[&str],
) -> Result<Vec<String>> {
    let resolve = metadata
        .resolve
        .as_ref()
        .context("`cargo metadata` did not include a resolved dependency graph")?;

    let root = metadata
        .packages
        .iter()
        .find(|p| p.name == package_name)
        .with_context(|| format!("package `{}` not found in workspace", package_name))?;

    let id_to_name: HashMap<&PackageId, &str> = metadata
        .packages
        .iter()
        .map(|p| (&p.id, p.name.as_str()))
        .collect();

    let adjacency: HashMap<&PackageId, Vec<&PackageId>> = resolve
        .nodes
        .iter()
        .map(|node| (&node.id, node.deps.iter().map(|dep| &dep.pkg).collect()))
        .collect();

    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(&root.id);
    visited.insert(&root.id);

    let mut violations = Vec::new();

    while let Some(current) = queue.pop_front() {
        let Some(deps) = adjacency.get(current) else {
            continue;
        };

        for dep in deps.iter().copied() {
            if !visited.insert(dep) {
                continue;
            }

            if let Some(name) = id_to_name.get(dep)
                && forbidden.contains(name)
            {
                violations.push((*name).to_string());
            }

            queue.push_back(dep);
        }
    }

    violations.sort();
    violations.dedup();
    Ok(violations)
}
