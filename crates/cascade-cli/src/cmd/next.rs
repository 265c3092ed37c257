use super::Project;
use crate::output::print_json;

pub fn run(project: &Project, json: bool) -> anyhow::Result<()> {
    let loaded = project.load()?;
    let driver = &loaded.driver;
    let next = driver.next();

    if json {
        return print_json(&serde_json::json!({ "next": next }));
    }

    match next {
        Some(r) => {
            let title = driver
                .registry()
                .get(&r.session)
                .map(|s| s.title())
                .unwrap_or_default();
            println!("Next:     {}", r.session);
            println!("Title:    {title}");
            println!("State:    {}", r.state);
            if !r.stale_because.is_empty() {
                println!("Because:  upstream changed: {}", r.stale_because.join(", "));
            }
            println!("Command:  cascade run --session {}", r.session);
        }
        None => {
            let blocked: Vec<String> = driver
                .status_report()
                .into_iter()
                .filter(|r| r.state == cascade_core::resolver::SessionState::Blocked)
                .map(|r| r.session)
                .collect();
            if blocked.is_empty() {
                println!("All sessions complete.");
            } else {
                println!("Nothing runnable. Blocked: {}", blocked.join(", "));
            }
        }
    }
    Ok(())
}
