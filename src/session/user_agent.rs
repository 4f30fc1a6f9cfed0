use rand::seq::SliceRandom;
use std::sync::Arc;

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User agent rotator; each new session picks one at random
#[derive(Debug, Clone)]
pub struct UserAgentRotator {
    user_agents: Arc<Vec<String>>,
}

impl UserAgentRotator {
    pub fn new(user_agents: &[String]) -> Self {
        let agents = if user_agents.is_empty() {
            Self::default_user_agents()
        } else {
            user_agents.to_vec()
        };

        Self {
            user_agents: Arc::new(agents),
        }
    }

    /// Get a random user agent
    pub fn get_random_user_agent(&self) -> &str {
        let mut rng = rand::thread_rng();
        self.user_agents
            .choose(&mut rng)
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }

    pub fn count(&self) -> usize {
        self.user_agents.len()
    }

    /// Desktop agents only; mobile agents get a different profile page layout
    fn default_user_agents() -> Vec<String> {
        vec![
            // Chrome
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),

            // Firefox
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),

            // Safari
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),

            // Edge
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0 Safari/537.36".to_string(),
        ]
    }
}

impl Default for UserAgentRotator {
    fn default() -> Self {
        Self::new(&[])
    }
}
