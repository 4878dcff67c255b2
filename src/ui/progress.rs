use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ProgressManager {
    mp: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a bar.
    /// - `id`: unique name of the bar
    /// - `total`: length of the bar
    /// - `template`: indicatif template
    /// - `message`: initial message
    pub fn create_bar(
        &self,
        id: &str,
        total: u64,
        template: &str,
        message: &str,
    ) -> Result<(), String> {
        let mut bars = self
            .bars
            .lock()
            .map_err(|e| format!("Lock error: {}", e))?;

        if bars.contains_key(id) {
            return Err(format!("Progress bar '{}' already exists", id));
        }

        let style = ProgressStyle::default_bar()
            .template(template)
            .map_err(|e| format!("Bad template: {}", e))?
            .progress_chars("█▉▊▋▌▍▎▏ ");
        let pb = self
            .mp
            .add(ProgressBar::new(total));
        pb.set_style(style);
        pb.set_message(message.to_string());

        bars.insert(id.to_string(), pb);
        Ok(())
    }

    fn with_bar(&self, id: &str, f: impl FnOnce(&ProgressBar)) -> Result<(), String> {
        let bars = self
            .bars
            .lock()
            .map_err(|e| format!("Lock error: {}", e))?;
        match bars.get(id) {
            Some(pb) => {
                f(pb);
                Ok(())
            }
            None => Err(format!("Progress bar '{}' not found", id)),
        }
    }

    pub fn set_position(&self, id: &str, pos: u64) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_position(pos))
    }

    pub fn set_message(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_message(message.to_string()))
    }

    /// Finish a bar and keep it on screen with a final message.
    pub fn finish(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.finish_with_message(message.to_string()))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.bars
            .lock()
            .map(|bars| bars.contains_key(id))
            .unwrap_or(false)
    }

    pub fn finish_all(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, pb) in bars.drain() {
                pb.finish();
            }
        }
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

pub mod templates {
    pub const SIMULATION: &str =
        "SIM  [{bar:30.cyan}] {percent}% ({pos}/{len} ms) {msg}";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_lifecycle() {
        let pm = ProgressManager::new();
        pm.create_bar("sim", 100, templates::SIMULATION, "start")
            .unwrap();
        assert!(pm.exists("sim"));
        assert!(pm.create_bar("sim", 1, templates::SIMULATION, "")
            .is_err());
        pm.set_position("sim", 40).unwrap();
        pm.set_message("sim", "halfway").unwrap();
        assert!(pm.set_position("missing", 1).is_err());
        pm.finish("sim", "done").unwrap();
        pm.finish_all();
        assert!(!pm.exists("sim"));
    }
}
