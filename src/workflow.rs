//! Block Kit payload for the channel-join workflow button.

use serde_json::{Value, json};

/// `action_id` carried by the join button.
pub const JOIN_CHANNEL_ACTION_ID: &str = "join_channel";

/// Build the blocks a workflow step renders to let someone join `channel_id`.
pub fn join_channel_blocks(channel_id: &str) -> Value {
    json!({
        "blocks": [
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("Want in on <#{channel_id}>? Hit the button below."),
                },
            },
            {
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "text": { "type": "plain_text", "text": "Join channel" },
                        "style": "primary",
                        "action_id": JOIN_CHANNEL_ACTION_ID,
                        "value": channel_id,
                    }
                ],
            },
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_targets_the_configured_channel() {
        let payload = join_channel_blocks("C0123");

        let button = &payload["blocks"][1]["elements"][0];
        assert_eq!(button["type"], "button");
        assert_eq!(button["action_id"], JOIN_CHANNEL_ACTION_ID);
        assert_eq!(button["value"], "C0123");
        assert!(
            payload["blocks"][0]["text"]["text"]
                .as_str()
                .is_some_and(|text| text.contains("<#C0123>"))
        );
    }
}
