use oobmig_core::{Migration, MigrationInterrupt, Version};

const WIDTH: usize = 72;

fn top(title: &str) -> String {
    let dashes = WIDTH - 2 - title.chars().count() - 5; // 2 for ╭╮, 5 for "─── " + " "
    format!("╭─── {title} {}╮", "─".repeat(dashes))
}

fn bottom() -> String {
    format!("╰{}╯", "─".repeat(WIDTH - 2))
}

fn row(text: &str) -> String {
    let inner = WIDTH - 4; // "│ " + " │"
    let mut text: String = text.chars().take(inner).collect();
    let pad = inner - text.chars().count();
    text.push_str(&" ".repeat(pad));
    format!("│ {text} │")
}

/// Box listing each checkpoint of an upgrade or downgrade campaign.
pub fn render_plan(from: Version, to: Version, interrupts: &[MigrationInterrupt]) -> String {
    let direction = if from <= to { "Upgrade" } else { "Downgrade" };
    let mut lines = vec![top(&format!("{direction} {from} → {to}")), row("")];

    if interrupts.is_empty() {
        lines.push(row("  No out-of-band migrations need to complete."));
    } else {
        for interrupt in interrupts {
            let ids: Vec<String> = interrupt
                .migration_ids
                .iter()
                .map(ToString::to_string)
                .collect();
            lines.push(row(&format!(
                "  stop at {:<8} wait for {}",
                interrupt.version.to_string(),
                ids.join(", ")
            )));
        }
    }

    lines.push(row(""));
    lines.push(bottom());
    lines.join("\n")
}

/// Box with one line per persisted migration.
pub fn render_status(migrations: &[Migration]) -> String {
    let mut lines = vec![top("Out-of-band migrations"), row("")];

    if migrations.is_empty() {
        lines.push(row("  No migrations recorded. Run `oobmig sync` first."));
    }
    for m in migrations {
        let window = match m.deprecated {
            Some(deprecated) => format!("{}–{}", m.introduced, deprecated),
            None => format!("{}–", m.introduced),
        };
        lines.push(row(&format!(
            "  {:>4}  {:<11} {:>6.1}%  {:<10} {}",
            m.id,
            window,
            m.progress * 100.0,
            m.status().as_str(),
            m.component
        )));
        if let Some(err) = m.last_error() {
            lines.push(row(&format!("        last error: {}", err.message)));
        }
    }

    lines.push(row(""));
    lines.push(bottom());
    lines.join("\n")
}
