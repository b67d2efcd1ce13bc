use chrono::Local;

use crate::analysis::{AnalysisRecord, Wellbeing};

/// Only the aggregate well-being classification gates notification; the
/// individual indicators are carried in the message body.
pub fn should_alert(record: &AnalysisRecord) -> bool {
    record.wellbeing == Wellbeing::Distressed
}

pub fn alert_message(record: &AnalysisRecord, detected_at: &str) -> String {
    let notes = if record.notes.trim().is_empty() {
        "No additional notes"
    } else {
        record.notes.trim()
    };
    let mut lines = vec![
        format!("A turtle event has been detected at: {detected_at}"),
        format!("Turtle Well Being: {}", record.wellbeing),
    ];
    for (label, value) in indicator_rows(record) {
        lines.push(format!("{label}: {value}"));
    }
    lines.push(format!("Additional Notes: {notes}"));
    lines.join("\n") + "\n"
}

/// [`alert_message`] stamped with the current local time.
pub fn alert_message_now(record: &AnalysisRecord) -> String {
    let detected_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    alert_message(record, &detected_at)
}

fn indicator_rows(record: &AnalysisRecord) -> [(&'static str, bool); 6] {
    [
        ("Carapace Up", record.carapace_up),
        ("Plastron Visible", record.plastron_visible),
        ("Entrapment", record.entrapment),
        ("Unusual Inactivity", record.unusual_inactivity),
        ("Aggressive Interactions", record.aggressive_interactions),
        ("Eggs Present", record.eggs_present),
    ]
}
