//! Plan construction: topological ordering of requested steps.

use {
    crate::workorder::StepDoc,
    ordo_shared::error::{Error, Result},
    std::collections::{BTreeSet, HashMap, HashSet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Temporary,
    Permanent,
}

/// Order `steps` so every step runs after the steps of the modules it
/// depends on.
///
/// The dependency graph is restricted to the requested modules: a declared
/// dependency that is not part of the workorder is an error, not an implicit
/// addition. Ties keep workorder insertion order, so the same document
/// always produces the same plan.
pub fn plan<'a>(
    steps: &[&'a StepDoc],
    dependency_index: &HashMap<String, Vec<String>>,
) -> Result<Vec<&'a StepDoc>> {
    let mut wanted: Vec<&str> = Vec::new();
    for step in steps {
        if !wanted.contains(&step.module_id.as_str()) {
            wanted.push(&step.module_id);
        }
    }
    let wanted_set: HashSet<&str> = wanted.iter().copied().collect();

    let missing: BTreeSet<String> = wanted
        .iter()
        .flat_map(|m| deps_of(dependency_index, m))
        .filter(|d| !d.is_empty() && !wanted_set.contains(d.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingDep(missing.into_iter().collect()));
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for module in &wanted {
        if marks.get(module) != Some(&Mark::Permanent) {
            visit(module, dependency_index, &wanted_set, &mut marks, &mut order)?;
        }
    }

    // Steps follow their module's position; several steps of one module keep
    // document order.
    let mut planned = Vec::with_capacity(steps.len());
    for module in order {
        for step in steps {
            if step.module_id == module {
                planned.push(*step);
            }
        }
    }
    Ok(planned)
}

fn deps_of<'m>(index: &'m HashMap<String, Vec<String>>, module: &str) -> &'m [String] {
    index.get(module).map(Vec::as_slice).unwrap_or(&[])
}

fn visit<'m>(
    module: &'m str,
    index: &'m HashMap<String, Vec<String>>,
    wanted_set: &HashSet<&str>,
    marks: &mut HashMap<&'m str, Mark>,
    order: &mut Vec<&'m str>,
) -> Result<()> {
    match marks.get(module) {
        Some(Mark::Permanent) => return Ok(()),
        Some(Mark::Temporary) => return Err(Error::Cycle(module.to_owned())),
        None => {}
    }
    marks.insert(module, Mark::Temporary);
    for dep in deps_of(index, module) {
        if wanted_set.contains(dep.as_str()) {
            visit(dep, index, wanted_set, marks, order)?;
        }
    }
    marks.insert(module, Mark::Permanent);
    order.push(module);
    Ok(())
}
