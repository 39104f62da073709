use std::fmt;

/// Self-declared identity of a client connection (its `User-Agent`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity(Option<String>);

impl ClientIdentity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self(Some(user_agent.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn from_header(value: Option<&str>) -> Self {
        Self(value.map(str::to_owned))
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("<none>"))
    }
}

/// Decides whether a client is known to open and immediately abandon a first
/// "phantom" connection. The relay delays bridge setup for such clients and
/// the console reloads instead of retrying when its connect watchdog fires.
pub trait PhantomPolicy: Send + Sync + fmt::Debug {
    fn expects_phantom(&self, identity: &ClientIdentity) -> bool;
}

/// Matches user agents containing any of `include` and none of `exclude`.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl UserAgentPolicy {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Desktop and iOS Safari. Chromium-based agents also advertise `Safari`
    /// and are excluded by their own tokens.
    pub fn safari() -> Self {
        Self::new(
            vec!["Safari".into()],
            ["Chrome", "Chromium", "CriOS", "FxiOS", "Edg", "Android"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }
}

impl Default for UserAgentPolicy {
    fn default() -> Self {
        Self::safari()
    }
}

impl PhantomPolicy for UserAgentPolicy {
    fn expects_phantom(&self, identity: &ClientIdentity) -> bool {
        let Some(agent) = identity.as_str() else {
            return false;
        };
        self.include.iter().any(|needle| agent.contains(needle.as_str()))
            && !self.exclude.iter().any(|needle| agent.contains(needle.as_str()))
    }
}

/// Never delays and never reloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPhantom;

impl PhantomPolicy for NeverPhantom {
    fn expects_phantom(&self, _identity: &ClientIdentity) -> bool {
        false
    }
}
