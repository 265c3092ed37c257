use super::Project;
use crate::output::{list_or_dash, print_json, print_table};
use serde::Serialize;

#[derive(Serialize)]
struct SessionRow<'a> {
    id: &'a str,
    order: u32,
    title: &'a str,
    inputs: Vec<String>,
    optional_inputs: Vec<String>,
    outputs: Vec<String>,
    depends_on: Vec<&'a str>,
    extension: bool,
}

pub fn run(project: &Project, json: bool) -> anyhow::Result<()> {
    let loaded = project.load()?;
    let driver = &loaded.driver;
    let graph = driver.graph();
    let strings = |patterns: &[cascade_core::pattern::ArtifactPattern]| -> Vec<String> {
        patterns.iter().map(|p| p.to_string()).collect()
    };

    let mut rows = Vec::new();
    for id in graph.topological_order() {
        let session = driver.registry().require(id)?;
        rows.push(SessionRow {
            id: session.id(),
            order: session.order(),
            title: session.title(),
            inputs: strings(session.inputs()),
            optional_inputs: strings(session.optional_inputs()),
            outputs: strings(session.outputs()),
            depends_on: graph.dependencies(id)?,
            extension: session.is_extension(),
        });
    }

    if json {
        return print_json(&rows);
    }

    let table = rows
        .into_iter()
        .map(|r| {
            let mut inputs = r.inputs;
            inputs.extend(r.optional_inputs.into_iter().map(|p| format!("{p}?")));
            vec![
                r.order.to_string(),
                r.id.to_string(),
                list_or_dash(inputs),
                list_or_dash(r.outputs),
                list_or_dash(r.depends_on),
            ]
        })
        .collect();
    print_table(&["ORDER", "ID", "INPUTS", "OUTPUTS", "DEPENDS ON"], table);
    Ok(())
}
