use std::fmt::Write as _;

use s402::proto::PaymentRequired;

use crate::types::PaywallConfig;

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders a minimal HTML paywall for browser clients.
///
/// The encoded requirements are embedded in a `data-payment-required`
/// attribute so a wallet script can pick them up.
#[must_use]
pub fn render_paywall(
    required: &PaymentRequired,
    encoded: &str,
    config: Option<&PaywallConfig>,
) -> String {
    let app_name = config
        .and_then(|c| c.app_name.as_deref())
        .unwrap_or("Payment required");
    let description = required
        .resource
        .as_ref()
        .and_then(|r| r.description.as_deref())
        .unwrap_or("This resource requires payment.");

    let mut options = String::new();
    for req in &required.accepts {
        let _ = write!(
            options,
            "<li>{} {} on {} to {}</li>",
            escape(&req.amount),
            escape(&req.asset),
            escape(&req.network),
            escape(&req.pay_to)
        );
    }

    let logo = config
        .and_then(|c| c.app_logo.as_deref())
        .map(|src| format!(r#"<img src="{}" alt="" height="48">"#, escape(src)))
        .unwrap_or_default();
    let testnet = if config.is_some_and(|c| c.testnet) {
        "<p><strong>Testnet</strong></p>"
    } else {
        ""
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{title}</title></head>
<body data-payment-required="{encoded}">
{logo}<h1>{title}</h1>
<p>{description}</p>
{testnet}<ul>{options}</ul>
</body>
</html>"#,
        title = escape(app_name),
        encoded = escape(encoded),
        description = escape(description),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use s402::proto::{PaymentRequirements, ResourceInfo};
    use serde_json::json;

    #[test]
    fn untrusted_text_is_escaped() {
        let required = PaymentRequired {
            x402_version: 2,
            error: None,
            resource: Some(ResourceInfo {
                url: "http://x/".into(),
                description: Some("<script>alert(1)</script>".into()),
                mime_type: None,
            }),
            accepts: vec![PaymentRequirements {
                scheme: "exact".into(),
                network: "eip155:8453".into(),
                asset: "0xA".into(),
                amount: "1500000".into(),
                pay_to: "0xB".into(),
                max_timeout_seconds: 300,
                extra: json!({}),
            }],
            extensions: None,
        };
        let config = PaywallConfig {
            app_name: Some("Shop".into()),
            app_logo: None,
            testnet: true,
        };

        let html = render_paywall(&required, "abc=", Some(&config));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("1500000"));
        assert!(html.contains("Testnet"));
        assert!(html.contains(r#"data-payment-required="abc=""#));
    }
}
