//! Metadata resolver
//!
//! Metadata is extracted by trying an ordered group of [`AudioProber`]
//! strategies chosen by the file's MIME type. Partial results are merged so
//! that earlier strategies win per field, and the chain stops as soon as the
//! merged result is complete.

pub mod container;
pub mod ffprobe;
pub mod id3;
pub mod mime;

use crate::core::audio_meta::AudioMeta;
use crate::core::config::{ResolverConfig, ToolsConfig};
use crate::core::error::{CadenceError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use self::container::ContainerProber;
pub use self::ffprobe::FfprobeProber;
pub use self::id3::Id3Prober;
pub use self::mime::detect_mime;

/// One way of extracting metadata from an audio file
#[async_trait]
pub trait AudioProber: Send + Sync {
    /// Name used in configuration and logs
    fn name(&self) -> &str;

    /// Extract whatever metadata this strategy can find.
    ///
    /// An `Err` only means this strategy failed; the resolver moves on to the
    /// next one.
    async fn probe_audio(&self, path: &Path) -> Result<AudioMeta>;
}

/// Strategies registered for one MIME pattern, in trial order
pub struct ProberGroup {
    pattern: Regex,
    probers: Vec<Arc<dyn AudioProber>>,
}

impl ProberGroup {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn prober_names(&self) -> Vec<&str> {
        self.probers.iter().map(|p| p.name()).collect()
    }
}

/// Maps MIME types to ordered prober groups.
///
/// Built once at startup and shared by the scanner; groups are matched in
/// registration order and the first match wins.
#[derive(Default)]
pub struct Resolver {
    groups: Vec<ProberGroup>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group for MIME types matching `pattern`
    pub fn register(&mut self, pattern: &str, probers: Vec<Arc<dyn AudioProber>>) -> Result<()> {
        let pattern = Regex::new(pattern).map_err(|e| {
            CadenceError::ConfigError(format!("invalid mime pattern {:?}: {}", pattern, e))
        })?;
        self.groups.push(ProberGroup { pattern, probers });
        Ok(())
    }

    /// Build the resolver from configured groups.
    ///
    /// Strategy names missing from `available` (for instance ffprobe when the
    /// tool is not installed) are left out; a group left with no strategy is
    /// not registered.
    pub fn from_config(
        config: &ResolverConfig,
        available: &HashMap<String, Arc<dyn AudioProber>>,
    ) -> Result<Self> {
        let mut resolver = Self::new();

        for group in &config.groups {
            let probers: Vec<Arc<dyn AudioProber>> = group
                .strategies
                .iter()
                .filter_map(|name| {
                    let prober = available.get(name).cloned();
                    if prober.is_none() {
                        warn!(strategy = %name, mime = %group.mime, "Prober unavailable, leaving it out");
                    }
                    prober
                })
                .collect();

            if probers.is_empty() {
                warn!(mime = %group.mime, "No usable prober for mime group");
                continue;
            }

            resolver.register(&group.mime, probers)?;
        }

        for group in &resolver.groups {
            info!(mime = %group.pattern(), probers = ?group.prober_names(), "Registered prober group");
        }

        Ok(resolver)
    }

    pub fn groups(&self) -> &[ProberGroup] {
        &self.groups
    }

    fn group_for(&self, mime: &str) -> Option<&ProberGroup> {
        self.groups.iter().find(|g| g.pattern.is_match(mime))
    }

    /// Whether any group handles this MIME type
    pub fn has_prober(&self, mime: &str) -> bool {
        self.group_for(mime).is_some()
    }

    /// Detect the MIME type of `path` and run its prober group
    pub async fn probe(&self, path: &Path) -> Result<AudioMeta> {
        let mime = detect_mime(path).await?;
        self.probe_as(path, &mime).await
    }

    /// Run the prober group for an already detected MIME type
    pub async fn probe_as(&self, path: &Path, mime: &str) -> Result<AudioMeta> {
        let group = self
            .group_for(mime)
            .ok_or_else(|| CadenceError::NoProberFound(mime.to_string()))?;

        let mut meta = AudioMeta::default();
        for prober in &group.probers {
            match prober.probe_audio(path).await {
                Ok(mut partial) => {
                    partial.normalize();
                    meta.merge(&partial);
                    if meta.is_complete() {
                        debug!(path = ?path, prober = prober.name(), "Metadata complete");
                        break;
                    }
                }
                Err(e) => {
                    debug!(path = ?path, prober = prober.name(), error = %e, "Prober failed, trying next");
                }
            }
        }

        Ok(meta)
    }
}

/// Instantiate every built-in prober, keyed by its configuration name.
///
/// The external-tool prober is only included when ffprobe can be run.
pub async fn builtin_probers(tools: &ToolsConfig) -> HashMap<String, Arc<dyn AudioProber>> {
    let mut probers: HashMap<String, Arc<dyn AudioProber>> = HashMap::new();

    let id3: Arc<dyn AudioProber> = Arc::new(Id3Prober::new());
    let container: Arc<dyn AudioProber> = Arc::new(ContainerProber::new());
    probers.insert(id3.name().to_string(), id3);
    probers.insert(container.name().to_string(), container);

    let ffprobe = FfprobeProber::new(
        tools.ffprobe_path.clone(),
        tools.ffmpeg_path.clone(),
        tools.probe_timeout(),
    );
    if ffprobe.is_available().await {
        probers.insert(ffprobe.name().to_string(), Arc::new(ffprobe));
    } else {
        warn!(path = ?tools.ffprobe_path, "ffprobe not found, external-tool probing disabled");
    }

    probers
}

/// Leading four-digit year of a date tag such as `2020`, `2020-05-01` or `2020/05`
pub(crate) fn parse_year(value: &str) -> i32 {
    let digits: String = value.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return 0;
    }
    digits[..4].parse().unwrap_or(0)
}

/// Track tag of the form `3` or `3/12`, as (track, total)
pub(crate) fn parse_track(value: &str) -> (u32, u32) {
    let mut parts = value.trim().splitn(2, '/');
    let track = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    let total = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    (track, total)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::config::ProberGroupConfig;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Prober returning a canned result and counting its calls
    pub(crate) struct StaticProber {
        name: String,
        result: std::result::Result<AudioMeta, String>,
        pub calls: AtomicUsize,
    }

    impl StaticProber {
        pub fn ok(name: &str, meta: AudioMeta) -> Arc<Self> {
            Arc::new(Self { name: name.to_string(), result: Ok(meta), calls: AtomicUsize::new(0) })
        }

        pub fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                result: Err("unsupported".to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AudioProber for StaticProber {
        fn name(&self) -> &str {
            &self.name
        }

        async fn probe_audio(&self, _path: &Path) -> Result<AudioMeta> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(CadenceError::ProbeError)
        }
    }

    fn title_only() -> AudioMeta {
        AudioMeta { title: "Song A".into(), ..Default::default() }
    }

    fn everything_but_title() -> AudioMeta {
        AudioMeta {
            artist: "Artist A".into(),
            album: "Album A".into(),
            year: 2020,
            genre: "Rock".into(),
            duration: 180.0,
            cover: Some(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_chain_merges_and_stops_when_complete() {
        let first = StaticProber::ok("first", title_only());
        let second = StaticProber::ok("second", everything_but_title());
        let third = StaticProber::ok("third", AudioMeta { genre: "Jazz".into(), ..Default::default() });

        let mut resolver = Resolver::new();
        resolver
            .register("^audio/mpeg$", vec![first.clone(), second.clone(), third.clone()])
            .unwrap();

        let meta = resolver.probe_as(Path::new("a.mp3"), "audio/mpeg").await.unwrap();

        let mut expected = title_only();
        expected.merge(&everything_but_title());
        assert_eq!(meta, expected);
        assert!(meta.is_complete());
        assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_earlier_prober_wins_per_field() {
        let first = StaticProber::ok("first", AudioMeta { title: "Tagged".into(), ..Default::default() });
        let second = StaticProber::ok("second", AudioMeta {
            title: "Probed".into(),
            artist: "Artist".into(),
            ..Default::default()
        });

        let mut resolver = Resolver::new();
        resolver.register("^audio/", vec![first, second]).unwrap();

        let meta = resolver.probe_as(Path::new("a.flac"), "audio/flac").await.unwrap();
        assert_eq!(meta.title, "Tagged");
        assert_eq!(meta.artist, "Artist");
    }

    #[tokio::test]
    async fn test_failing_prober_is_skipped() {
        let broken = StaticProber::failing("broken");
        let working = StaticProber::ok("working", title_only());

        let mut resolver = Resolver::new();
        resolver.register("^audio/mpeg$", vec![broken.clone(), working.clone()]).unwrap();

        let meta = resolver.probe_as(Path::new("a.mp3"), "audio/mpeg").await.unwrap();
        assert_eq!(meta.title, "Song A");
        assert!(!meta.is_complete());
        assert_eq!(broken.calls(), 1);
        assert_eq!(working.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_probers_failing_yields_empty_meta() {
        let mut resolver = Resolver::new();
        resolver.register("^audio/mpeg$", vec![StaticProber::failing("a"), StaticProber::failing("b")]).unwrap();

        let meta = resolver.probe_as(Path::new("a.mp3"), "audio/mpeg").await.unwrap();
        assert_eq!(meta, AudioMeta::default());
    }

    #[tokio::test]
    async fn test_no_group_for_mime() {
        let mut resolver = Resolver::new();
        resolver.register("^audio/mpeg$", vec![StaticProber::ok("a", title_only())]).unwrap();

        assert!(!resolver.has_prober("text/plain"));
        let err = resolver.probe_as(Path::new("notes.txt"), "text/plain").await.unwrap_err();
        assert!(matches!(err, CadenceError::NoProberFound(ref m) if m == "text/plain"));
    }

    #[tokio::test]
    async fn test_first_registered_group_wins() {
        let specific = StaticProber::ok("specific", title_only());
        let generic = StaticProber::ok("generic", AudioMeta::default());

        let mut resolver = Resolver::new();
        resolver.register("^audio/flac$", vec![specific.clone()]).unwrap();
        resolver.register("^audio/", vec![generic.clone()]).unwrap();

        resolver.probe_as(Path::new("a.flac"), "audio/flac").await.unwrap();
        assert_eq!((specific.calls(), generic.calls()), (1, 0));
    }

    #[test]
    fn test_from_config_skips_unavailable_probers() {
        let config = ResolverConfig {
            groups: vec![
                ProberGroupConfig {
                    mime: "^audio/mpeg$".into(),
                    strategies: vec!["id3".into(), "ffprobe".into()],
                },
                ProberGroupConfig {
                    mime: "^audio/flac$".into(),
                    strategies: vec!["ffprobe".into()],
                },
            ],
        };
        let mut available: HashMap<String, Arc<dyn AudioProber>> = HashMap::new();
        available.insert("id3".into(), StaticProber::ok("id3", AudioMeta::default()));

        let resolver = Resolver::from_config(&config, &available).unwrap();
        assert_eq!(resolver.groups().len(), 1);
        assert_eq!(resolver.groups()[0].prober_names(), vec!["id3"]);
        assert!(resolver.has_prober("audio/mpeg"));
        assert!(!resolver.has_prober("audio/flac"));
    }

    #[test]
    fn test_parse_year_and_track() {
        assert_eq!(parse_year("2020"), 2020);
        assert_eq!(parse_year("2020-05-01"), 2020);
        assert_eq!(parse_year(" 1999/12 "), 1999);
        assert_eq!(parse_year("May 2020"), 0);
        assert_eq!(parse_year("20"), 0);

        assert_eq!(parse_track("3"), (3, 0));
        assert_eq!(parse_track("3/12"), (3, 12));
        assert_eq!(parse_track(" 7 / 9 "), (7, 9));
        assert_eq!(parse_track("side A"), (0, 0));
    }
}
