use super::Project;
use crate::output::{print_json, print_table};
use cascade_core::resolver::{Resolution, SessionState};
use serde::Serialize;

#[derive(Serialize)]
struct StatusRow<'a> {
    #[serde(flatten)]
    resolution: &'a Resolution,
    title: &'a str,
}

pub fn run(project: &Project, json: bool) -> anyhow::Result<()> {
    let loaded = project.load()?;
    let driver = &loaded.driver;
    let report = driver.status_report();
    let title = |id: &str| driver.registry().get(id).map(|s| s.title()).unwrap_or("");

    if json {
        let rows: Vec<StatusRow> = report
            .iter()
            .map(|r| StatusRow {
                resolution: r,
                title: title(&r.session),
            })
            .collect();
        return print_json(&rows);
    }

    let rows = report
        .iter()
        .map(|r| {
            vec![
                r.session.clone(),
                title(&r.session).to_string(),
                r.state.to_string(),
                detail(r),
            ]
        })
        .collect();
    print_table(&["SESSION", "TITLE", "STATE", "DETAIL"], rows);

    let done = report
        .iter()
        .filter(|r| r.state == SessionState::Complete)
        .count();
    println!();
    println!("{done}/{} sessions complete", report.len());
    Ok(())
}

pub(crate) fn detail(r: &Resolution) -> String {
    if let Some(err) = &r.error {
        return format!("error: {err}");
    }
    match r.state {
        SessionState::Blocked => format!("missing {}", r.missing_inputs.join(", ")),
        SessionState::Stale => format!("upstream changed: {}", r.stale_because.join(", ")),
        SessionState::Runnable => String::new(),
        SessionState::Complete => String::new(),
    }
}
