//! `~/.ssh/config`-backed host store.
//!
//! Reads `Host` blocks into [`HostRecord`]s and writes imported hosts back,
//! touching only the directives hostshare manages. Remarks are kept as a
//! `# Remark: …` comment inside the block since ssh has no such keyword.

use std::path::{Path, PathBuf};

use hostshare_core::{write_atomic, HostRecord, HostStore, HostStoreError};

const REMARK_PREFIX: &str = "# Remark:";
const MANAGED_KEYS: [&str; 4] = ["hostname", "user", "port", "identityfile"];

pub struct SshConfigStore {
    path: PathBuf,
}

impl SshConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.ssh/config`.
    pub fn default_path() -> PathBuf {
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(".ssh")
            .join("config")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String, HostStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(HostStoreError::ReadFailed(self.path.clone(), e)),
        }
    }
}

impl HostStore for SshConfigStore {
    fn list_hosts(&self) -> Result<Vec<HostRecord>, HostStoreError> {
        Ok(parse_hosts(&self.read()?))
    }

    fn save_host(&self, host: &HostRecord) -> Result<(), HostStoreError> {
        let updated = upsert_host(&self.read()?, host)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HostStoreError::WriteFailed(self.path.clone(), e))?;
        }
        write_atomic(&self.path, updated.as_bytes())
            .map_err(|e| HostStoreError::WriteFailed(self.path.clone(), e))?;
        tracing::info!(host = %host.host, path = %self.path.display(), "saved host entry");
        Ok(())
    }
}

/// Split a config line into `(key, value)`, accepting `Key value` and `Key=value`.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if let Some(eq_pos) = line.find('=') {
        let (k, v) = line.split_at(eq_pos);
        if !k.trim().contains(char::is_whitespace) {
            return Some((k.trim(), v[1..].trim()));
        }
    }
    let space_pos = line.find(char::is_whitespace)?;
    let (k, v) = line.split_at(space_pos);
    Some((k.trim(), v.trim()))
}

fn is_host_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return None;
    }
    match split_directive(trimmed) {
        Some((key, value)) if key.eq_ignore_ascii_case("host") => Some(value),
        _ => None,
    }
}

/// Parse every `Host` block. Directives outside the managed set land in `extra`.
pub fn parse_hosts(content: &str) -> Vec<HostRecord> {
    let mut hosts = Vec::new();
    let mut current: Option<HostRecord> = None;

    for line in content.lines() {
        if let Some(alias) = is_host_line(line) {
            hosts.extend(current.take());
            current = Some(HostRecord::new(alias));
            continue;
        }

        let Some(host) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();

        if let Some(remark) = trimmed.strip_prefix(REMARK_PREFIX) {
            host.remark = Some(remark.trim().to_string());
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = split_directive(trimmed) else {
            continue;
        };

        match key.to_lowercase().as_str() {
            "hostname" => host.host_name = Some(value.to_string()),
            "user" => host.user = Some(value.to_string()),
            "port" => host.port = Some(value.to_string()),
            "identityfile" => host.identity_file = Some(value.to_string()),
            _ => {
                host.extra
                    .insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    hosts.extend(current);
    hosts
}

fn managed_lines(host: &HostRecord, indent: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let fields = [
        ("HostName", &host.host_name),
        ("User", &host.user),
        ("Port", &host.port),
        ("IdentityFile", &host.identity_file),
    ];
    for (key, value) in fields {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            lines.push(format!("{indent}{key} {value}"));
        }
    }
    if let Some(remark) = host.remark.as_deref().filter(|r| !r.is_empty()) {
        lines.push(format!("{indent}{REMARK_PREFIX} {remark}"));
    }
    lines
}

/// Replace the managed directives of the block whose alias matches
/// `host.host`, or append a new block. Records that would not survive as a
/// single well-formed block are refused.
pub fn upsert_host(content: &str, host: &HostRecord) -> Result<String, HostStoreError> {
    host.validate()?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines
        .iter()
        .position(|line| is_host_line(line) == Some(host.host.as_str()));

    let Some(start) = start else {
        let mut out = content.trim_end().to_string();
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("Host {}\n", host.host));
        for line in managed_lines(host, "  ") {
            out.push_str(&line);
            out.push('\n');
        }
        return Ok(out);
    };

    let end = lines[start + 1..]
        .iter()
        .position(|line| is_host_line(line).is_some())
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let body = &lines[start + 1..end];
    let indent = body
        .iter()
        .find(|line| !line.trim().is_empty())
        .map(|line| &line[..line.len() - line.trim_start().len()])
        .unwrap_or("  ");

    let mut kept: Vec<String> = body
        .iter()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with(REMARK_PREFIX) {
                return false;
            }
            match split_directive(trimmed) {
                Some((key, _)) if !trimmed.starts_with('#') => {
                    !MANAGED_KEYS.contains(&key.to_lowercase().as_str())
                }
                _ => true,
            }
        })
        .map(|line| line.to_string())
        .collect();

    // Keep blank separator lines after the rewritten directives.
    let trailing_blank = kept.iter().rev().take_while(|l| l.trim().is_empty()).count();
    let tail = kept.split_off(kept.len() - trailing_blank);

    let mut out: Vec<String> = lines[..=start].iter().map(|l| l.to_string()).collect();
    out.extend(managed_lines(host, indent));
    out.extend(kept);
    out.extend(tail);
    out.extend(lines[end..].iter().map(|l| l.to_string()));

    let mut text = out.join("\n");
    text.push('\n');
    Ok(text)
}
