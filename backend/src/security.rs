//! Security controls
//!
//! Password policy, request rate limiting, response headers and input
//! hygiene helpers. Nothing here is tied to an HTTP framework: callers pass
//! in the raw header values they have.

use crate::config::{
    PasswordPolicySettings, SecuritySettings, ALLOWED_IMAGE_EXTENSIONS, ALLOWED_PHOTO_MIME_TYPES,
    COMMON_PASSWORD_PATTERNS, MAX_PHOTO_SIZE_BYTES, PASSWORD_MAX_LENGTH,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{};:'\",.<>?/\\|`~";

// ===== Password Policy =====

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    settings: PasswordPolicySettings,
}

impl PasswordPolicy {
    pub fn new(settings: PasswordPolicySettings) -> Self {
        Self { settings }
    }

    /// Every rule the password breaks; empty when it is acceptable
    pub fn violations(&self, password: &str) -> Vec<String> {
        let s = &self.settings;
        let length = password.chars().count();
        let mut errors = Vec::new();

        if length < s.min_length {
            errors.push(format!(
                "Password must be at least {} characters long",
                s.min_length
            ));
        }
        if length > PASSWORD_MAX_LENGTH {
            errors.push(format!(
                "Password must not exceed {} characters",
                PASSWORD_MAX_LENGTH
            ));
        }
        if s.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if s.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if s.require_digits && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one digit".to_string());
        }
        if s.require_special && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
            errors.push("Password must contain at least one special character".to_string());
        }

        let lowered = password.to_lowercase();
        if COMMON_PASSWORD_PATTERNS.iter().any(|p| lowered.contains(p)) {
            errors.push("Password contains common patterns and is too weak".to_string());
        }

        errors
    }

    pub fn validate(&self, password: &str) -> crate::error::Result<()> {
        let errors = self.violations(password);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::error::AppError::Validation(errors.join("; ")))
        }
    }
}

// ===== Rate Limiting =====

/// Time source for the rate limiter
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sliding-window limiter keyed by client identifier.
///
/// Each identifier keeps the instants of its accepted requests inside the
/// window. A request is refused once the window already holds `limit`
/// entries; refused requests are not recorded. Identifiers whose window
/// has emptied are dropped, so the table only holds recent clients.
pub struct RateLimiter {
    enabled: bool,
    limit: usize,
    window: Duration,
    login_limit: usize,
    login_window: Duration,
    clock: Arc<dyn Clock>,
    requests: Mutex<Requests>,
}

struct Requests {
    by_identifier: HashMap<String, Recent>,
    last_sweep: Instant,
}

/// Accepted request instants of one identifier and the window they age out of
struct Recent {
    stamps: VecDeque<Instant>,
    window: Duration,
}

impl Recent {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.duration_since(*oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Requests {
    /// Drop every identifier with nothing left in its window
    fn sweep(&mut self, now: Instant) {
        self.by_identifier.retain(|_, recent| {
            recent.prune(now);
            !recent.stamps.is_empty()
        });
        self.last_sweep = now;
    }
}

impl RateLimiter {
    pub fn new(settings: &SecuritySettings, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            enabled: settings.rate_limit_enabled,
            limit: settings.rate_limit_requests,
            window: Duration::from_secs(settings.rate_limit_window_secs),
            login_limit: settings.login_rate_limit,
            login_window: Duration::from_secs(settings.login_rate_window_secs),
            clock,
            requests: Mutex::new(Requests {
                by_identifier: HashMap::new(),
                last_sweep: started,
            }),
        }
    }

    /// General request limit
    pub fn check(&self, identifier: &str) -> bool {
        self.check_with(identifier, self.limit, self.window)
    }

    /// Stricter limit for login attempts
    pub fn check_login(&self, identifier: &str) -> bool {
        self.check_with(&login_key(identifier), self.login_limit, self.login_window)
    }

    /// Forget login attempts after a successful login
    pub fn reset_login(&self, identifier: &str) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.by_identifier.remove(&login_key(identifier));
    }

    pub fn check_with(&self, identifier: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }

        let now = self.clock.now();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());

        // Idle identifiers are swept at most once per general window
        if now.duration_since(requests.last_sweep) >= self.window {
            requests.sweep(now);
        }

        let recent = requests
            .by_identifier
            .entry(identifier.to_string())
            .or_insert_with(|| Recent {
                stamps: VecDeque::new(),
                window,
            });
        recent.window = window;
        recent.prune(now);

        if recent.stamps.len() >= limit {
            if recent.stamps.is_empty() {
                requests.by_identifier.remove(identifier);
            }
            tracing::warn!("Rate limit exceeded for {}", identifier);
            return false;
        }

        recent.stamps.push_back(now);
        true
    }

    #[cfg(test)]
    fn tracked_identifiers(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_identifier
            .len()
    }
}

fn login_key(identifier: &str) -> String {
    format!("login_{}", identifier)
}

// ===== Headers =====

/// Headers to attach to every response, empty when disabled
pub fn security_headers(settings: &SecuritySettings) -> Vec<(&'static str, String)> {
    if !settings.headers_enabled {
        return Vec::new();
    }

    vec![
        (
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload".to_string(),
        ),
        ("X-Frame-Options", "DENY".to_string()),
        ("X-Content-Type-Options", "nosniff".to_string()),
        ("X-XSS-Protection", "1; mode=block".to_string()),
        ("Content-Security-Policy", settings.csp_policy.clone()),
        (
            "Referrer-Policy",
            "strict-origin-when-cross-origin".to_string(),
        ),
        (
            "Permissions-Policy",
            "geolocation=(), microphone=(), camera=(), payment=()".to_string(),
        ),
        ("Server", "Secure".to_string()),
    ]
}

// ===== Input Hygiene =====

/// Check an uploaded image's name, type and size
pub fn validate_file_upload(
    filename: &str,
    content_type: &str,
    size: usize,
) -> std::result::Result<(), String> {
    if size > MAX_PHOTO_SIZE_BYTES {
        return Err(format!(
            "File size exceeds maximum allowed size of {:.1}MB",
            MAX_PHOTO_SIZE_BYTES as f64 / (1024.0 * 1024.0)
        ));
    }

    let extension = extension_of(filename);
    if !ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(format!(
            "File type not allowed. Allowed types: {}",
            ALLOWED_IMAGE_EXTENSIONS.join(", ")
        ));
    }

    if !ALLOWED_PHOTO_MIME_TYPES.contains(&content_type) {
        return Err("Invalid file type. Expected image file.".to_string());
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err("Invalid filename. Path traversal detected.".to_string());
    }

    Ok(())
}

/// Addressing information of an incoming request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOrigin<'a> {
    pub forwarded_for: Option<&'a str>,
    pub real_ip: Option<&'a str>,
    pub peer: Option<&'a str>,
}

impl<'a> RequestOrigin<'a> {
    /// Origin known only by its socket address
    pub fn peer(addr: &'a str) -> Self {
        Self {
            peer: Some(addr),
            ..Default::default()
        }
    }

    /// First hop of X-Forwarded-For, then X-Real-IP, then the peer address
    pub fn client_ip(&self) -> String {
        if let Some(first) = self
            .forwarded_for
            .and_then(|f| f.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first.to_string();
        }

        self.real_ip
            .filter(|s| !s.is_empty())
            .or(self.peer)
            .unwrap_or("unknown")
            .to_string()
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(&filename.to_lowercase())
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PasswordPolicy {
        PasswordPolicy::new(PasswordPolicySettings::default())
    }

    #[test]
    fn test_strong_password_accepted() {
        assert!(policy().violations("Tr0ub4dor&Horse").is_empty());
        assert!(policy().validate("Tr0ub4dor&Horse").is_ok());
    }

    #[test]
    fn test_every_violation_reported() {
        let errors = policy().violations("short");
        assert!(errors.iter().any(|e| e.contains("at least 12")));
        assert!(errors.iter().any(|e| e.contains("uppercase")));
        assert!(errors.iter().any(|e| e.contains("digit")));
        assert!(errors.iter().any(|e| e.contains("special")));
        assert!(!errors.iter().any(|e| e.contains("lowercase")));
    }

    #[test]
    fn test_common_pattern_rejected() {
        let errors = policy().violations("MyPassword#2024");
        assert_eq!(errors, vec!["Password contains common patterns and is too weak"]);
    }

    #[test]
    fn test_max_length() {
        let long = format!("Aa1!{}", "x".repeat(PASSWORD_MAX_LENGTH));
        assert!(policy()
            .violations(&long)
            .iter()
            .any(|e| e.contains("must not exceed")));
    }

    fn limiter(clock: &ManualClock) -> RateLimiter {
        let settings = SecuritySettings {
            rate_limit_requests: 3,
            rate_limit_window_secs: 60,
            login_rate_limit: 2,
            login_rate_window_secs: 300,
            ..SecuritySettings::default()
        };
        RateLimiter::new(&settings, Arc::new(clock.clone()))
    }

    #[test]
    fn test_rate_limit_window_slides() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock);

        assert!(limiter.check("10.0.0.1"));
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));

        // Other clients are unaffected
        assert!(limiter.check("10.0.0.2"));

        // First request leaves the window
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
    }

    #[test]
    fn test_login_limit_and_reset() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock);

        assert!(limiter.check_login("alice"));
        assert!(limiter.check_login("alice"));
        assert!(!limiter.check_login("alice"));

        // Login attempts do not consume the general budget
        assert!(limiter.check("alice"));

        limiter.reset_login("alice");
        assert!(limiter.check_login("alice"));

        clock.advance(Duration::from_secs(301));
        assert!(limiter.check_login("alice"));
        assert!(limiter.check_login("alice"));
    }

    #[test]
    fn test_idle_identifiers_are_evicted() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock);

        for i in 0..50 {
            assert!(limiter.check(&format!("10.0.1.{}", i)));
        }
        assert!(limiter.check_login("alice"));
        assert_eq!(limiter.tracked_identifiers(), 51);

        // General windows have lapsed, the login window has not
        clock.advance(Duration::from_secs(61));
        assert!(limiter.check("10.0.2.1"));
        assert_eq!(limiter.tracked_identifiers(), 2);

        clock.advance(Duration::from_secs(300));
        assert!(limiter.check("10.0.2.1"));
        assert_eq!(limiter.tracked_identifiers(), 1);
    }

    #[test]
    fn test_refused_first_request_leaves_no_entry() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock);

        assert!(!limiter.check_with("blocked", 0, Duration::from_secs(60)));
        assert_eq!(limiter.tracked_identifiers(), 0);
    }

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let settings = SecuritySettings {
            rate_limit_enabled: false,
            rate_limit_requests: 0,
            ..SecuritySettings::default()
        };
        let limiter = RateLimiter::new(&settings, Arc::new(SystemClock));
        assert!(limiter.check("anyone"));
    }

    #[test]
    fn test_security_headers() {
        let mut settings = SecuritySettings::default();
        let headers = security_headers(&settings);
        assert!(headers.iter().any(|(k, v)| *k == "X-Frame-Options" && v == "DENY"));
        assert!(headers
            .iter()
            .any(|(k, v)| *k == "Content-Security-Policy" && v == &settings.csp_policy));

        settings.headers_enabled = false;
        assert!(security_headers(&settings).is_empty());
    }

    #[test]
    fn test_validate_file_upload() {
        assert!(validate_file_upload("photo.JPG", "image/jpeg", 1024).is_ok());
        assert!(validate_file_upload("photo.exe", "image/jpeg", 1024).is_err());
        assert!(validate_file_upload("photo.png", "text/plain", 1024).is_err());
        assert!(validate_file_upload("photo.png", "image/png", MAX_PHOTO_SIZE_BYTES + 1).is_err());
        assert!(validate_file_upload("..\\evil.png", "image/png", 10)
            .unwrap_err()
            .contains("Path traversal"));
    }

    #[test]
    fn test_client_ip() {
        let origin = |forwarded_for, real_ip, peer| RequestOrigin {
            forwarded_for,
            real_ip,
            peer,
        };
        assert_eq!(
            origin(Some("203.0.113.7, 10.0.0.1"), Some("10.0.0.2"), Some("10.0.0.3")).client_ip(),
            "203.0.113.7"
        );
        assert_eq!(origin(None, Some("10.0.0.2"), Some("10.0.0.3")).client_ip(), "10.0.0.2");
        assert_eq!(origin(Some(" "), None, Some("10.0.0.3")).client_ip(), "10.0.0.3");
        assert_eq!(RequestOrigin::peer("10.0.0.3").client_ip(), "10.0.0.3");
        assert_eq!(RequestOrigin::default().client_ip(), "unknown");
    }
}
