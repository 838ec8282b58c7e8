//! Per-command line prefixes.

use std::time::{Duration, Instant};

use chrono::format::{Item, StrftimeItems};
use serde_json::{Value, json};

use crate::config::PrefixConfig;
use crate::style::Style;
use crate::template::{Template, TemplateData, TemplateError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrefixError {
    #[error("invalid prefix template: {0}")]
    InvalidTemplate(#[from] TemplateError),
    #[error("invalid timestamp format: {0}")]
    InvalidTimeFormat(String),
}

/// What a prefix shows
#[derive(Debug, Clone)]
enum PrefixMode {
    /// Name, falling back to the (truncated) command
    Name,
    Index,
    Pid,
    Time,
    Command,
    Template(Template),
}

/// Per-slot record, owned by the renderer and addressed by slot index
#[derive(Debug, Clone, Default)]
pub struct PrefixData {
    pub index: usize,
    pub name: String,
    pub command: String,
    /// 0 until the process has started
    pub pid: u32,
    /// Time text of the latest render
    pub time: String,
    pub padding: String,
    style: Style,
    cache: Option<String>,
}

impl TemplateData for PrefixData {
    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "Index" => json!(self.index),
            "Name" => json!(self.name),
            "Command" => json!(self.command),
            "Pid" => json!(self.pid),
            "Time" => json!(self.time),
            "Padding" => json!(self.padding),
            _ => return None,
        };
        Some(value)
    }
}

/// Renders `[label] ` prefixes for registered slots
#[derive(Debug, Clone)]
pub struct PrefixRenderer {
    mode: PrefixMode,
    max_command_length: usize,
    time_format: String,
    time_since_start: bool,
    started: Instant,
    /// Time-varying prefixes are never cached
    timed: bool,
    data: Vec<PrefixData>,
}

impl PrefixRenderer {
    /// Build a renderer from the configured mode or template
    ///
    /// Templates are compiled once and rendered against an empty record, so
    /// an unusable template fails here rather than mid-run.
    pub fn new(config: &PrefixConfig) -> Result<Self, PrefixError> {
        validate_time_format(&config.timestamp_format)?;

        let mode = match config.template.as_str() {
            "" | "name" => PrefixMode::Name,
            "idx" | "index" => PrefixMode::Index,
            "pid" => PrefixMode::Pid,
            "time" => PrefixMode::Time,
            "command" => PrefixMode::Command,
            source => {
                let template = Template::parse(source)?;
                template.render(&PrefixData::default())?;
                PrefixMode::Template(template)
            }
        };

        let timed = match &mode {
            PrefixMode::Time => true,
            PrefixMode::Template(template) => template.references("Time"),
            _ => false,
        };

        Ok(Self {
            mode,
            max_command_length: config.prefix_length,
            time_format: config.timestamp_format.clone(),
            time_since_start: config.time_since_start,
            started: Instant::now(),
            timed,
            data: Vec::new(),
        })
    }

    /// Register a slot and return its index
    pub fn add(&mut self, name: Option<&str>, command: &str, pid: u32, style: Style) -> usize {
        let index = self.data.len();
        self.data.push(PrefixData {
            index,
            name: name.unwrap_or_default().to_string(),
            command: command.to_string(),
            pid,
            style,
            ..PrefixData::default()
        });
        index
    }

    pub fn is_timed(&self) -> bool {
        self.timed
    }

    pub fn data(&self, index: usize) -> &PrefixData {
        &self.data[index]
    }

    /// Render the prefix of `index`, including the trailing space
    ///
    /// # Panics
    /// If `index` was never registered.
    pub fn render(&mut self, index: usize, with_color: bool) -> String {
        if with_color && let Some(cached) = &self.data[index].cache {
            return cached.clone();
        }

        let time = self.now();
        let data = &mut self.data[index];
        data.time = time;

        let label = match &self.mode {
            PrefixMode::Name if !data.name.is_empty() => data.name.clone(),
            PrefixMode::Name | PrefixMode::Command => {
                truncate(&data.command, self.max_command_length)
            }
            PrefixMode::Index => data.index.to_string(),
            PrefixMode::Pid => data.pid.to_string(),
            PrefixMode::Time => data.time.clone(),
            PrefixMode::Template(template) => match template.render(data) {
                Ok(rendered) => rendered,
                Err(e) => {
                    tracing::warn!(slot = index, error = %e, "prefix template failed");
                    e.to_string()
                }
            },
        };

        let bracketed = match self.mode {
            // Templates carry their own `{{.Padding}}`
            PrefixMode::Template(_) => format!("[{label}]"),
            _ => format!("[{label}{}]", data.padding),
        };

        if !with_color {
            return bracketed + " ";
        }

        let prefix = data.style.apply(&bracketed) + " ";
        if !self.timed {
            data.cache = Some(prefix.clone());
        }
        prefix
    }

    /// Pad every slot to the width of the widest prefix
    ///
    /// Must run after all slots are registered and before rendering starts.
    pub fn apply_even_padding(&mut self) {
        if let PrefixMode::Template(template) = &mut self.mode
            && !template.references("Padding")
        {
            template.append_field("Padding");
        }

        let mut widths = Vec::with_capacity(self.data.len());
        for index in 0..self.data.len() {
            self.data[index].padding.clear();
            self.data[index].cache = None;
            widths.push(self.render(index, false).chars().count());
        }

        let max = widths.iter().copied().max().unwrap_or_default();
        for (data, width) in self.data.iter_mut().zip(widths) {
            data.padding = " ".repeat(max - width);
            data.cache = None;
        }
    }

    fn now(&self) -> String {
        if self.time_since_start {
            format_elapsed(self.started.elapsed())
        } else {
            chrono::Local::now().format(&self.time_format).to_string()
        }
    }
}

fn validate_time_format(format: &str) -> Result<(), PrefixError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(PrefixError::InvalidTimeFormat(format.to_string()));
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if max == 0 {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

/// Elapsed time rounded to milliseconds, e.g. `850ms`, `1s 500ms`, `2m 3s 40ms`
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = (elapsed.as_micros() + 500) / 1000;
    let rounded = Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX));
    humantime::format_duration(rounded).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::style::Color;
    use rstest::rstest;

    fn renderer(template: &str) -> PrefixRenderer {
        PrefixRenderer::new(&PrefixConfig {
            template: template.into(),
            ..PrefixConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn prefix_template_renders_index_and_name() {
        let mut prefix = renderer("{{.Index}}-{{.Name}}");
        prefix.add(Some("api"), "cargo run", 10, Style::default());
        prefix.add(Some("db"), "postgres", 11, Style::default());
        prefix.add(Some("web"), "npm start", 12, Style::default());

        insta::assert_snapshot!(format!("{:?}", prefix.render(2, false)), @r#""[2-web] ""#);
    }

    #[rstest]
    #[case("", Some("web"), "[web] ")]
    #[case("", None, "[npm start ] ")]
    #[case("name", None, "[npm start ] ")]
    #[case("command", Some("web"), "[npm start ] ")]
    #[case("index", Some("web"), "[0] ")]
    #[case("idx", None, "[0] ")]
    #[case("pid", None, "[4242] ")]
    fn prefix_render_uses_mode(
        #[case] template: &str,
        #[case] name: Option<&str>,
        #[case] expected: &str,
    ) {
        let mut prefix = renderer(template);
        prefix.add(name, "npm start --watch", 4242, Style::default());
        assert_eq!(prefix.render(0, false), expected);
    }

    #[test]
    fn prefix_render_does_not_truncate_when_length_is_zero() {
        let mut prefix = PrefixRenderer::new(&PrefixConfig {
            template: "command".into(),
            prefix_length: 0,
            ..PrefixConfig::default()
        })
        .unwrap();
        prefix.add(None, "npm start --watch", 1, Style::default());

        assert_eq!(prefix.render(0, false), "[npm start --watch] ");
    }

    #[rstest]
    #[case("bogus")]
    #[case("{{.Unknown}}")]
    #[case("{{.Name")]
    #[case("{{.Name | nope}}")]
    fn prefix_new_rejects_invalid_template(#[case] template: &str) {
        let result = PrefixRenderer::new(&PrefixConfig {
            template: template.into(),
            ..PrefixConfig::default()
        });
        assert!(matches!(result, Err(PrefixError::InvalidTemplate(_))));
    }

    #[test]
    fn prefix_new_rejects_invalid_time_format() {
        let result = PrefixRenderer::new(&PrefixConfig {
            template: "time".into(),
            timestamp_format: "%Q".into(),
            ..PrefixConfig::default()
        });
        assert!(matches!(result, Err(PrefixError::InvalidTimeFormat(_))));
    }

    #[test]
    fn prefix_render_with_color_wraps_and_caches() {
        let mut prefix = renderer("name");
        prefix.add(Some("web"), "npm start", 1, Style::color(Color::DarkBlue));

        let first = prefix.render(0, true);
        assert!(first.contains("[web]"));
        assert!(first.starts_with('\x1b'));
        assert!(first.ends_with(' '));
        assert_eq!(prefix.data(0).cache.as_deref(), Some(first.as_str()));
        assert_eq!(prefix.render(0, true), first);
    }

    #[rstest]
    #[case("time")]
    #[case("{{.Time}} {{.Name}}")]
    fn prefix_render_never_caches_time_prefixes(#[case] template: &str) {
        let mut prefix = renderer(template);
        prefix.add(Some("web"), "npm start", 1, Style::color(Color::DarkBlue));

        assert!(prefix.is_timed());
        prefix.render(0, true);
        assert!(prefix.data(0).cache.is_none());
    }

    #[rstest]
    #[case("name")]
    #[case("{{.Index}}:{{.Name}}")]
    #[case("{{.Name}}{{.Padding}}!")]
    fn prefix_apply_even_padding_equalizes_widths(#[case] template: &str) {
        let mut prefix = renderer(template);
        prefix.add(Some("a"), "x", 1, Style::default());
        prefix.add(Some("backend"), "y", 2, Style::default());
        prefix.add(Some("db"), "z", 3, Style::default());

        let before: Vec<usize> = (0..3)
            .map(|i| prefix.render(i, false).chars().count())
            .collect();
        let max = before.iter().copied().max().unwrap();

        prefix.apply_even_padding();

        for i in 0..3 {
            assert_eq!(prefix.render(i, false).chars().count(), max);
        }
    }

    #[test]
    fn prefix_apply_even_padding_is_idempotent() {
        let mut prefix = renderer("name");
        prefix.add(Some("a"), "x", 1, Style::default());
        prefix.add(Some("backend"), "y", 2, Style::default());

        prefix.apply_even_padding();
        let first: Vec<String> = (0..2).map(|i| prefix.data(i).padding.clone()).collect();
        prefix.apply_even_padding();
        let second: Vec<String> = (0..2).map(|i| prefix.data(i).padding.clone()).collect();

        assert_eq!(first, second);
        assert_eq!(prefix.render(0, false), "[a      ] ");
        assert_eq!(prefix.render(1, false), "[backend] ");
    }

    #[test]
    fn prefix_apply_even_padding_clears_cache() {
        let mut prefix = renderer("name");
        prefix.add(Some("a"), "x", 1, Style::color(Color::DarkRed));
        prefix.add(Some("abc"), "y", 2, Style::color(Color::DarkRed));
        prefix.render(0, true);

        prefix.apply_even_padding();

        assert!(prefix.data(0).cache.is_none());
        assert!(prefix.render(0, true).contains("[a  ]"));
    }

    #[rstest]
    #[case(Duration::ZERO, "0s")]
    #[case(Duration::from_millis(850), "850ms")]
    #[case(Duration::from_micros(1_499_600), "1s 500ms")]
    #[case(Duration::from_millis(123_040), "2m 3s 40ms")]
    #[case(Duration::from_secs(3600), "1h")]
    fn format_elapsed_matches_expected(#[case] elapsed: Duration, #[case] expected: &str) {
        assert_eq!(format_elapsed(elapsed), expected);
    }
}
