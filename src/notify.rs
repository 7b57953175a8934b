#[cfg(not(windows))]
use colorful::{Color, Colorful};

/// Somewhere to show the user a short message. Fire and forget.
pub trait NotificationSink: Send + Sync {
    fn show(&self, message: &str);
}

impl<F> NotificationSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn show(&self, message: &str) {
        self(message)
    }
}

/// Prints messages to stdout with an `[AUTH]` prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl NotificationSink for ConsoleNotifier {
    fn show(&self, message: &str) {
        #[cfg(windows)]
        println!("[AUTH] {}", message);

        #[cfg(not(windows))]
        println!(
            "{} {}",
            "[AUTH]".gradient_with_color(Color::Cyan, Color::SpringGreen4),
            message
        );
    }
}
