use medadmin_core::models::NotificationKind;
use medadmin_core::services::{ServiceResult, ToastSink};

/// Prints toasts to stderr so they never mix with JSON on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleToast;

pub fn format_toast(kind: NotificationKind, text: &str) -> String {
    format!("[{}] {}", kind.to_string().to_uppercase(), text)
}

impl ToastSink for ConsoleToast {
    fn show(&self, kind: NotificationKind, text: &str) -> ServiceResult<()> {
        eprintln!("{}", format_toast(kind, text));
        Ok(())
    }
}
