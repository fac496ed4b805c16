//! Built-in context definitions.
//!
//! Each definition is an independent type implementing
//! [`ContextDefinition`]:
//!
//! - [`SimpleContextDefinition`]: free-form strings compared for equality
//! - [`EnumContextDefinition`]: values of any `FromStr + Display` type
//! - [`IpSetContextDefinition`]: CIDR ranges that match contained addresses
//! - [`ServerTagContextDefinition`]: tags configured for this server
//! - [`TimeContextDefinition`]: `before-time` / `after-time` windows
//! - [`FallbackContextDefinition`]: equality matching for unregistered keys

use std::fmt;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parking_lot::RwLock;

use super::definition::ContextDefinition;
use crate::subject::SubjectRef;

/// Supplies the current values of a context for a subject.
pub type CurrentValues<V> = Arc<dyn Fn(&SubjectRef) -> Vec<V> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Simple
// ─────────────────────────────────────────────────────────────────────────────

/// String-valued context compared by equality (e.g. `world`).
pub struct SimpleContextDefinition {
    name: String,
    current: Option<CurrentValues<String>>,
}

impl SimpleContextDefinition {
    /// A definition with no live values (data can still be stored under it).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: None,
        }
    }

    /// A definition whose live values come from `current`.
    pub fn with_current<F>(name: impl Into<String>, current: F) -> Self
    where
        F: Fn(&SubjectRef) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            current: Some(Arc::new(current)),
        }
    }
}

impl ContextDefinition for SimpleContextDefinition {
    type Value = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self, value: &String) -> String {
        value.clone()
    }

    fn deserialize(&self, raw: &str) -> Option<String> {
        Some(raw.to_owned())
    }

    fn matches(&self, own: &String, test: &String) -> bool {
        own == test
    }

    fn accumulate_current_values(&self, subject: &SubjectRef, emit: &mut dyn FnMut(String)) {
        if let Some(current) = &self.current {
            current(subject).into_iter().for_each(emit);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Enum
// ─────────────────────────────────────────────────────────────────────────────

/// Context whose values are drawn from a closed set parsed with `FromStr`.
pub struct EnumContextDefinition<E> {
    name: String,
    current: Option<CurrentValues<E>>,
    _values: PhantomData<fn() -> E>,
}

impl<E> EnumContextDefinition<E>
where
    E: FromStr + fmt::Display + PartialEq + Send + Sync + 'static,
{
    /// A definition with no live values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: None,
            _values: PhantomData,
        }
    }

    /// A definition whose live values come from `current`.
    pub fn with_current<F>(name: impl Into<String>, current: F) -> Self
    where
        F: Fn(&SubjectRef) -> Vec<E> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            current: Some(Arc::new(current)),
            _values: PhantomData,
        }
    }
}

impl<E> ContextDefinition for EnumContextDefinition<E>
where
    E: FromStr + fmt::Display + PartialEq + Send + Sync + 'static,
{
    type Value = E;

    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self, value: &E) -> String {
        value.to_string()
    }

    fn deserialize(&self, raw: &str) -> Option<E> {
        raw.parse().ok()
    }

    fn matches(&self, own: &E, test: &E) -> bool {
        own == test
    }

    fn accumulate_current_values(&self, subject: &SubjectRef, emit: &mut dyn FnMut(E)) {
        if let Some(current) = &self.current {
            current(subject).into_iter().for_each(emit);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IP sets
// ─────────────────────────────────────────────────────────────────────────────

/// An address range in CIDR form. A bare address is a full-length prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IpRange {
    address: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Create a range, clamping the prefix to the address family's width.
    #[must_use]
    pub fn new(address: IpAddr, prefix: u8) -> Self {
        Self {
            address,
            prefix: prefix.min(Self::width(&address)),
        }
    }

    /// A single-address range.
    #[must_use]
    pub fn host(address: IpAddr) -> Self {
        Self::new(address, Self::width(&address))
    }

    fn width(address: &IpAddr) -> u8 {
        match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    fn bits(address: &IpAddr) -> u128 {
        match address {
            IpAddr::V4(v4) => u128::from(u32::from(*v4)),
            IpAddr::V6(v6) => u128::from(*v6),
        }
    }

    fn network(&self, prefix: u8) -> u128 {
        let width = Self::width(&self.address);
        let host_bits = u32::from(width - prefix);
        let bits = Self::bits(&self.address);
        if host_bits >= 128 {
            0
        } else {
            (bits >> host_bits) << host_bits
        }
    }

    /// Whether `other` lies entirely inside this range.
    #[must_use]
    pub fn contains(&self, other: &IpRange) -> bool {
        if Self::width(&self.address) != Self::width(&other.address) || other.prefix < self.prefix {
            return false;
        }
        self.network(self.prefix) == other.network(self.prefix)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix == Self::width(&self.address) {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}/{}", self.address, self.prefix)
        }
    }
}

impl FromStr for IpRange {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((address, prefix)) => {
                let address: IpAddr = address.trim().parse()?;
                let prefix = prefix
                    .trim()
                    .parse::<u8>()
                    .unwrap_or_else(|_| Self::width(&address));
                Ok(Self::new(address, prefix))
            }
            None => Ok(Self::host(s.trim().parse()?)),
        }
    }
}

/// Network-segment context: stored ranges match active addresses they contain.
pub struct IpSetContextDefinition {
    name: String,
    current: Option<CurrentValues<IpAddr>>,
}

impl IpSetContextDefinition {
    /// A definition with no live values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: None,
        }
    }

    /// A definition whose live addresses come from `current`.
    pub fn with_current<F>(name: impl Into<String>, current: F) -> Self
    where
        F: Fn(&SubjectRef) -> Vec<IpAddr> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            current: Some(Arc::new(current)),
        }
    }
}

impl ContextDefinition for IpSetContextDefinition {
    type Value = IpRange;

    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self, value: &IpRange) -> String {
        value.to_string()
    }

    fn deserialize(&self, raw: &str) -> Option<IpRange> {
        raw.parse().ok()
    }

    fn matches(&self, own: &IpRange, test: &IpRange) -> bool {
        own.contains(test)
    }

    fn accumulate_current_values(&self, subject: &SubjectRef, emit: &mut dyn FnMut(IpRange)) {
        if let Some(current) = &self.current {
            for address in current(subject) {
                emit(IpRange::host(address));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server tags
// ─────────────────────────────────────────────────────────────────────────────

/// Tags describing the server this engine runs on; all of them are active.
pub struct ServerTagContextDefinition {
    tags: RwLock<Vec<String>>,
}

impl ServerTagContextDefinition {
    /// Context key used for server tags.
    pub const NAME: &'static str = "server-tag";

    /// Create with an initial tag list.
    #[must_use]
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            tags: RwLock::new(tags),
        }
    }

    /// Replace the active tags.
    pub fn set_tags(&self, tags: Vec<String>) {
        *self.tags.write() = tags;
    }

    /// Currently configured tags.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.tags.read().clone()
    }
}

impl ContextDefinition for ServerTagContextDefinition {
    type Value = String;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn serialize(&self, value: &String) -> String {
        value.clone()
    }

    fn deserialize(&self, raw: &str) -> Option<String> {
        Some(raw.to_owned())
    }

    fn matches(&self, own: &String, test: &String) -> bool {
        own == test
    }

    fn accumulate_current_values(&self, _subject: &SubjectRef, emit: &mut dyn FnMut(String)) {
        self.tags.read().iter().cloned().for_each(emit);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Time windows
// ─────────────────────────────────────────────────────────────────────────────

/// Which side of a timestamp a [`TimeContextDefinition`] selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeBound {
    /// Data applies while the current time is before the stored instant.
    Before,
    /// Data applies once the current time is after the stored instant.
    After,
}

/// Time-window context. The active value is always "now".
pub struct TimeContextDefinition {
    bound: TimeBound,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl TimeContextDefinition {
    /// `before-time` using the system clock.
    #[must_use]
    pub fn before() -> Self {
        Self::with_clock(TimeBound::Before, Utc::now)
    }

    /// `after-time` using the system clock.
    #[must_use]
    pub fn after() -> Self {
        Self::with_clock(TimeBound::After, Utc::now)
    }

    /// A definition driven by a custom clock.
    pub fn with_clock<F>(bound: TimeBound, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            bound,
            clock: Arc::new(clock),
        }
    }
}

impl ContextDefinition for TimeContextDefinition {
    type Value = DateTime<Utc>;

    fn name(&self) -> &str {
        match self.bound {
            TimeBound::Before => "before-time",
            TimeBound::After => "after-time",
        }
    }

    fn serialize(&self, value: &DateTime<Utc>) -> String {
        value.to_rfc3339()
    }

    fn deserialize(&self, raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Some(instant.with_timezone(&Utc));
        }
        if let Some(offset) = parse_relative(raw) {
            return (self.clock)().checked_add_signed(offset);
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc())
    }

    fn matches(&self, own: &DateTime<Utc>, test: &DateTime<Utc>) -> bool {
        match self.bound {
            TimeBound::Before => test < own,
            TimeBound::After => test > own,
        }
    }

    fn accumulate_current_values(
        &self,
        _subject: &SubjectRef,
        emit: &mut dyn FnMut(DateTime<Utc>),
    ) {
        emit((self.clock)());
    }
}

/// Parse a signed relative offset such as `+1d2h` or `-30m`.
///
/// Units: `w`, `d`, `h`, `m`, `s`.
fn parse_relative(raw: &str) -> Option<TimeDelta> {
    let (negative, rest) = match raw.as_bytes().first()? {
        b'+' => (false, &raw[1..]),
        b'-' => (true, &raw[1..]),
        _ => return None,
    };
    if rest.is_empty() {
        return None;
    }
    let mut total = TimeDelta::zero();
    let mut digits = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let amount: i64 = digits.parse().ok()?;
        digits.clear();
        let unit = match ch {
            'w' => TimeDelta::try_weeks(amount)?,
            'd' => TimeDelta::try_days(amount)?,
            'h' => TimeDelta::try_hours(amount)?,
            'm' => TimeDelta::try_minutes(amount)?,
            's' => TimeDelta::try_seconds(amount)?,
            _ => return None,
        };
        total = total.checked_add(&unit)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback
// ─────────────────────────────────────────────────────────────────────────────

/// Equality matching for keys with no registered definition.
pub struct FallbackContextDefinition {
    name: String,
}

impl FallbackContextDefinition {
    /// Create a fallback for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ContextDefinition for FallbackContextDefinition {
    type Value = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self, value: &String) -> String {
        value.clone()
    }

    fn deserialize(&self, raw: &str) -> Option<String> {
        Some(raw.to_owned())
    }

    fn matches(&self, own: &String, test: &String) -> bool {
        own == test
    }

    fn accumulate_current_values(&self, _subject: &SubjectRef, _emit: &mut dyn FnMut(String)) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::definition::DynContextDefinition;
    use chrono::TimeZone;

    #[derive(Debug, PartialEq)]
    enum Dimension {
        Overworld,
        Nether,
    }

    impl fmt::Display for Dimension {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Overworld => f.write_str("overworld"),
                Self::Nether => f.write_str("nether"),
            }
        }
    }

    impl FromStr for Dimension {
        type Err = ();
        fn from_str(s: &str) -> Result<Self, ()> {
            match s {
                "overworld" => Ok(Self::Overworld),
                "nether" => Ok(Self::Nether),
                _ => Err(()),
            }
        }
    }

    fn subject() -> SubjectRef {
        SubjectRef::new("user", "alice")
    }

    #[test]
    fn simple_current_values() {
        let def = SimpleContextDefinition::with_current("world", |s| vec![format!("{}-home", s.identifier())]);
        assert_eq!(def.current_values(&subject()), vec!["alice-home"]);
        assert!(SimpleContextDefinition::new("world").current_values(&subject()).is_empty());
    }

    #[test]
    fn enum_parses_known_values_only() {
        let def = EnumContextDefinition::<Dimension>::with_current("dimension", |_| vec![Dimension::Nether]);
        assert_eq!(def.deserialize("nether"), Some(Dimension::Nether));
        assert_eq!(def.deserialize("end"), None);
        assert_eq!(def.current_values(&subject()), vec!["nether"]);
    }

    #[test]
    fn ip_range_parsing_and_display() {
        let range: IpRange = "10.0.0.0/8".parse().unwrap();
        assert_eq!(range.to_string(), "10.0.0.0/8");
        let host: IpRange = "192.168.1.4".parse().unwrap();
        assert_eq!(host.to_string(), "192.168.1.4");
        assert!("garbage".parse::<IpRange>().is_err());
    }

    #[test]
    fn ip_range_containment() {
        let def = IpSetContextDefinition::new("remoteip");
        let net = def.deserialize("10.0.0.0/8").unwrap();
        assert!(def.matches(&net, &def.deserialize("10.200.3.4").unwrap()));
        assert!(def.matches(&net, &def.deserialize("10.1.0.0/16").unwrap()));
        assert!(!def.matches(&net, &def.deserialize("11.0.0.1").unwrap()));
        assert!(!def.matches(&net, &def.deserialize("::1").unwrap()));
        let narrow = def.deserialize("10.1.0.0/16").unwrap();
        assert!(!def.matches(&narrow, &net));
    }

    #[test]
    fn ip_range_zero_prefix_contains_family() {
        let def = IpSetContextDefinition::new("remoteip");
        let everything = def.deserialize("0.0.0.0/0").unwrap();
        assert!(def.matches(&everything, &def.deserialize("203.0.113.9").unwrap()));
        let v6 = def.deserialize("2001:db8::/32").unwrap();
        assert!(def.matches(&v6, &def.deserialize("2001:db8:1::5").unwrap()));
    }

    #[test]
    fn server_tags_are_all_active() {
        let def = ServerTagContextDefinition::new(vec!["lobby".into(), "eu".into()]);
        assert_eq!(def.current_values(&subject()), vec!["lobby", "eu"]);
        def.set_tags(vec!["survival".into()]);
        assert_eq!(def.tags(), vec!["survival"]);
    }

    #[test]
    fn time_windows() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let before = TimeContextDefinition::with_clock(TimeBound::Before, move || now);
        let after = TimeContextDefinition::with_clock(TimeBound::After, move || now);
        let deadline = before.deserialize("2026-07-01").unwrap();
        assert!(before.matches(&deadline, &now));
        assert!(!after.matches(&deadline, &now));

        let erased: &dyn DynContextDefinition = &before;
        assert_eq!(erased.name(), "before-time");
        assert_eq!(erased.current_values(&subject()), vec![now.to_rfc3339()]);
    }

    #[test]
    fn time_accepts_rfc3339() {
        let def = TimeContextDefinition::after();
        let parsed = def.deserialize("2026-01-02T03:04:05Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());
        assert!(def.deserialize("yesterday").is_none());
    }

    #[test]
    fn time_accepts_relative_offsets() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let def = TimeContextDefinition::with_clock(TimeBound::Before, move || now);
        assert_eq!(
            def.deserialize("+1d2h").unwrap(),
            Utc.with_ymd_and_hms(2026, 6, 2, 14, 0, 0).unwrap()
        );
        assert_eq!(
            def.deserialize("-30m").unwrap(),
            Utc.with_ymd_and_hms(2026, 6, 1, 11, 30, 0).unwrap()
        );
        assert!(def.deserialize("+").is_none());
        assert!(def.deserialize("+5").is_none());
        assert!(def.deserialize("+3y").is_none());
    }
}
