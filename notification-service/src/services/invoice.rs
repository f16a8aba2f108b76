//! Invoice email rendering.
//!
//! Everything is taken from the job payload; the worker never reads the
//! transaction store.

use super::providers::EmailMessage;
use rust_decimal::Decimal;
use service_core::queue::NotificationJob;

/// Renders the receipt for a successful purchase as HTML plus a text fallback.
pub fn render_invoice(job: &NotificationJob) -> EmailMessage {
    let details = InvoiceDetails::from_job(job);

    EmailMessage {
        to: job.recipient.clone(),
        subject: job.subject.clone(),
        body_text: Some(details.text()),
        body_html: Some(details.html()),
        from_name: None,
        reply_to: None,
    }
}

struct InvoiceDetails {
    reference: String,
    date: String,
    customer: String,
    email: String,
    status: String,
    amount: String,
    usdc: String,
}

impl InvoiceDetails {
    fn from_job(job: &NotificationJob) -> Self {
        let payload = &job.payload;

        let customer = payload
            .customer_name
            .as_deref()
            .or(payload.customer_email.as_deref())
            .filter(|v| !v.is_empty())
            .unwrap_or("N/A")
            .to_string();

        Self {
            reference: payload.payment_reference.clone(),
            date: payload.created_at.format("%B %-d, %Y %H:%M UTC").to_string(),
            customer,
            email: payload
                .customer_email
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            status: payload.status.to_uppercase(),
            amount: format_charge(payload.amount_minor_units, &payload.currency),
            usdc: format!("{:.6}", payload.settlement_amount),
        }
    }

    fn text(&self) -> String {
        format!(
            "Payment Invoice\n\
             Thank you for your purchase!\n\n\
             Transaction ID: {}\n\
             Date: {}\n\
             Customer: {}\n\
             Email: {}\n\
             Status: {}\n\n\
             Amount Paid: {}\n\
             USDC Received: {} USDC\n\n\
             If you have any questions about this invoice, please contact our support team.\n",
            self.reference, self.date, self.customer, self.email, self.status, self.amount, self.usdc,
        )
    }

    fn html(&self) -> String {
        let row = |label: &str, value: &str| {
            format!(
                r#"<tr><td style="padding:8px 0;color:#6b7280;font-weight:bold">{}</td><td style="padding:8px 0;text-align:right">{}</td></tr>"#,
                label,
                escape_html(value)
            )
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="font-family:Arial,sans-serif;color:#333;max-width:600px;margin:0 auto;padding:20px">
<div style="background:#667eea;color:white;padding:30px;border-radius:10px 10px 0 0;text-align:center">
<h1>Payment Invoice</h1>
<p>Thank you for your purchase!</p>
</div>
<div style="background:#f9fafb;padding:30px;border:1px solid #e5e7eb;border-top:none">
<h2>Transaction Details</h2>
<table style="width:100%">{}{}{}{}{}</table>
<h2>Payment Summary</h2>
<table style="width:100%">{}{}</table>
<p style="margin-top:30px;padding:20px;background:#eff6ff;border-left:4px solid #3b82f6">
You have successfully purchased {} USDC for {}.
</p>
</div>
<p style="text-align:center;color:#6b7280;font-size:14px">If you have any questions about this invoice, please contact our support team.</p>
</body>
</html>"#,
            row("Transaction ID:", &self.reference),
            row("Date:", &self.date),
            row("Customer:", &self.customer),
            row("Email:", &self.email),
            row("Status:", &self.status),
            row("Amount Paid:", &self.amount),
            row("USDC Received:", &format!("{} USDC", self.usdc)),
            self.usdc,
            escape_html(&self.amount),
        )
    }
}

/// `2500, "usd"` renders as `25.00 USD`.
fn format_charge(amount_minor_units: i64, currency: &str) -> String {
    format!(
        "{:.2} {}",
        Decimal::new(amount_minor_units, 2),
        currency.to_uppercase()
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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
