//! Output formatting for CLI display.

use serde_json::json;

use crate::model::Document;
use crate::notify::Outcome;

/// One line per processed event.
pub(super) fn format_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Posted(ts) => format!("posted {ts}"),
        Outcome::Updated(ts) => format!("updated {ts}"),
        Outcome::Ignored(reason) => format!("ignored: {reason}"),
    }
}

/// A document as pretty JSON: message id, blocks, and any thread replies.
pub(super) fn show_json(doc: &Document, replies: &[String]) -> serde_json::Result<String> {
    let mut value = json!({
        "ts": doc.message_id(),
        "blocks": doc.blocks(),
    });
    if !replies.is_empty() {
        value["replies"] = json!(replies);
    }
    serde_json::to_string_pretty(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::ExecutionInfo;

    #[test]
    fn format_outcomes() {
        assert_eq!(
            format_outcome(&Outcome::Posted("1.000001".into())),
            "posted 1.000001"
        );
        assert_eq!(
            format_outcome(&Outcome::Updated("1.000001".into())),
            "updated 1.000001"
        );
        assert_eq!(
            format_outcome(&Outcome::Ignored("unknown source aws.ecs".into())),
            "ignored: unknown source aws.ecs"
        );
    }

    #[test]
    fn show_includes_replies_only_when_present() {
        let mut doc = Document::new(ExecutionInfo::new("app", "exec-1"), "*app*");
        doc.set_message_id("1.000001");
        doc.render();

        let bare: serde_json::Value = serde_json::from_str(&show_json(&doc, &[]).unwrap()).unwrap();
        assert_eq!(bare["ts"], "1.000001");
        assert_eq!(bare["blocks"][0]["block_id"], "0-title");
        assert!(bare.get("replies").is_none());

        let threaded: serde_json::Value =
            serde_json::from_str(&show_json(&doc, &["<@U1> done".into()]).unwrap()).unwrap();
        assert_eq!(threaded["replies"][0], "<@U1> done");
    }
}
