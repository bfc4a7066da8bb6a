use berth_provision::{DecommissionReport, ManagedMachine, StepStatus};
use comfy_table::{Cell, Color, Table};

pub fn print_machine(machine: &ManagedMachine) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(machine)?);
    Ok(())
}

pub fn report_table(report: &DecommissionReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(vec!["step", "status", "detail"]);

    for step in &report.steps {
        let (status, color) = match &step.status {
            StepStatus::Removed => ("removed".to_owned(), Color::Green),
            StepStatus::NotFoundIgnored => ("not found".to_owned(), Color::Yellow),
            StepStatus::Failed(message) => (format!("failed: {message}"), Color::Red),
        };
        table.add_row(vec![
            Cell::new(step.step),
            Cell::new(status).fg(color),
            Cell::new(step.detail.as_deref().unwrap_or("")),
        ]);
    }

    table
}

pub fn print_report(report: &DecommissionReport) {
    println!("{} on {}", report.name, report.host);
    println!("{}", report_table(report));
}
