//! Snapshot of the deployed app: database dump, app tree, Docker volumes and
//! a manifest, pulled into one local directory per run.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::{RunConfig, OPERATIONAL_USER};
use crate::error::{DeployError, DeployResult};
use crate::models::{Section, Step};
use crate::ssh_client::{shell_quote, RemoteTransport};

pub const BACKUP_SECTION_TITLE: &str = "Backup";
pub const DEFAULT_BACKUPS_DIR: &str = "backups";
pub const MANIFEST_FILE_NAME: &str = "MANIFEST.txt";

const DATABASE_DUMP_FILE: &str = "database.dump";
const APP_FILES_ARCHIVE: &str = "app_files.tar.gz";
const RULE: &str = "============================================================";

const CONTAINER_LOOKUP: &str = "sg docker -c 'docker compose ps -q' | while read c; do sg docker -c \"docker inspect --format='{{.Name}}' $c\"; done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseKind {
    Postgres,
    Mysql,
    #[default]
    None,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::None => "none",
        }
    }
}

/// Run state shared by the backup steps. Detection writes `database`, the
/// dump step reads it.
pub struct BackupContext {
    pub dir: PathBuf,
    pub stamp: String,
    pub vps_ip: String,
    pub app_dir_name: String,
    pub app_path: String,
    pub volume_filter: String,
    pub database: DatabaseKind,
    pub artifacts: Vec<String>,
    remote: Box<dyn RemoteTransport>,
}

impl BackupContext {
    pub fn new(
        config: &RunConfig,
        dir: impl Into<PathBuf>,
        stamp: impl Into<String>,
        remote: Box<dyn RemoteTransport>,
    ) -> Self {
        Self {
            dir: dir.into(),
            stamp: stamp.into(),
            vps_ip: config.vps_ip.clone(),
            app_dir_name: config.app_dir_name.clone(),
            app_path: config.remote_app_path(),
            volume_filter: config.backup_volume_filter.clone(),
            database: DatabaseKind::None,
            artifacts: Vec::new(),
            remote,
        }
    }

    fn local_file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

pub fn backup_stamp() -> String {
    Local::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub fn backup_section() -> Section<BackupContext> {
    Section::new(
        BACKUP_SECTION_TITLE,
        vec![
            Step::inline("Detect database type", detect_database_step),
            Step::inline("Dump database", dump_database_step),
            Step::inline("Backup application files", backup_app_files_step),
            Step::inline("Backup Docker volumes", backup_volumes_step),
            Step::inline("Write backup manifest", write_manifest_step),
        ],
    )
}

/// Postgres wins when both engines are mentioned.
pub fn detect_database(compose: &str) -> DatabaseKind {
    static POSTGRES: OnceLock<Regex> = OnceLock::new();
    static MYSQL: OnceLock<Regex> = OnceLock::new();

    let postgres =
        POSTGRES.get_or_init(|| Regex::new(r"(?i)postgres").expect("invalid postgres regex"));
    let mysql =
        MYSQL.get_or_init(|| Regex::new(r"(?i)mysql|mariadb").expect("invalid mysql regex"));

    if postgres.is_match(compose) {
        DatabaseKind::Postgres
    } else if mysql.is_match(compose) {
        DatabaseKind::Mysql
    } else {
        DatabaseKind::None
    }
}

fn detect_database_step(ctx: &mut BackupContext) -> DeployResult<Vec<String>> {
    let compose = match ctx
        .remote
        .run(&format!("cat {}/docker-compose.yml", ctx.app_path))
    {
        Ok(content) => content,
        Err(error) => {
            tracing::debug!(%error, "docker-compose.yml not readable, assuming no database");
            String::new()
        }
    };

    ctx.database = detect_database(&compose);
    Ok(vec![format!("detected: {}", ctx.database.as_str())])
}

// Dump output is binary; it is pulled with scp, never read from stdout.
fn dump_command(app_path: &str, database: DatabaseKind, remote_dump: &str) -> Option<String> {
    let (pattern, dump) = match database {
        DatabaseKind::Postgres => ("postgres", "pg_dump -U postgres --no-owner -Fc postgres"),
        DatabaseKind::Mysql => ("mysql", "mysqldump -u root --all-databases"),
        DatabaseKind::None => return None,
    };
    Some(format!(
        "cd {app_path} && DB=$({CONTAINER_LOOKUP} | grep -i {pattern} | head -1 | tr -d '/') && \
         sg docker -c \"docker exec $DB {dump}\" > {}",
        shell_quote(remote_dump)
    ))
}

fn dump_database_step(ctx: &mut BackupContext) -> DeployResult<Vec<String>> {
    let remote_dump = format!("/tmp/db_backup_{}.dump", ctx.stamp);
    let Some(command) = dump_command(&ctx.app_path, ctx.database, &remote_dump) else {
        return Ok(vec!["no database — skipped".to_string()]);
    };

    ctx.remote.run(&command)?;
    let path = ctx.local_file(DATABASE_DUMP_FILE);
    ctx.remote.pull(&remote_dump, &path)?;
    ctx.remote.run(&format!("rm -f {}", shell_quote(&remote_dump)))?;
    ctx.artifacts.push(DATABASE_DUMP_FILE.to_string());
    Ok(vec![format!("saved {}", size_label(&path)?)])
}

fn backup_app_files_step(ctx: &mut BackupContext) -> DeployResult<Vec<String>> {
    let remote_tar = format!("/tmp/app_backup_{}.tar.gz", ctx.stamp);
    ctx.remote.run(&format!(
        "tar -czf {} --exclude=node_modules --exclude=.git --exclude=.next -C /home/{OPERATIONAL_USER} {}",
        shell_quote(&remote_tar),
        shell_quote(&ctx.app_dir_name)
    ))?;

    let local = ctx.local_file(APP_FILES_ARCHIVE);
    ctx.remote.pull(&remote_tar, &local)?;
    ctx.remote.run(&format!("rm -f {}", shell_quote(&remote_tar)))?;
    ctx.artifacts.push(APP_FILES_ARCHIVE.to_string());
    Ok(vec![format!("saved {}", size_label(&local)?)])
}

fn volume_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_./-]*$").expect("invalid volume name regex")
    })
}

fn list_volumes(ctx: &BackupContext) -> Vec<String> {
    let command = format!(
        "cd {} && sg docker -c \"docker volume ls -q --filter driver=local\" | grep -F {} || true",
        ctx.app_path,
        shell_quote(&ctx.volume_filter)
    );
    match ctx.remote.run(&command) {
        Ok(listing) => listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(error) => {
            tracing::debug!(%error, "volume listing failed, treating as none");
            Vec::new()
        }
    }
}

fn backup_volumes_step(ctx: &mut BackupContext) -> DeployResult<Vec<String>> {
    let volumes = list_volumes(ctx);
    if volumes.is_empty() {
        return Ok(vec!["no named volumes — skipped".to_string()]);
    }

    let mut notes = Vec::new();
    for volume in volumes {
        if !volume_name_regex().is_match(&volume) {
            notes.push(format!("skipped unexpected volume name: {volume}"));
            continue;
        }

        let clean = volume.replace('/', "_");
        let archive = format!("vol_{clean}.tar.gz");
        let remote_tar = format!("/tmp/{archive}");
        ctx.remote.run(&format!(
            "sg docker -c \"docker run --rm -v {volume}:/data -v /tmp:/backup alpine tar -czf /backup/{archive} -C /data .\""
        ))?;
        ctx.remote.pull(&remote_tar, &ctx.local_file(&archive))?;
        ctx.remote.run(&format!("rm -f {}", shell_quote(&remote_tar)))?;
        ctx.artifacts.push(archive);
        notes.push(format!("volume: {volume}"));
    }
    Ok(notes)
}

fn write_manifest_step(ctx: &mut BackupContext) -> DeployResult<Vec<String>> {
    let entries = collect_manifest_entries(&ctx.dir)?;
    let created = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let manifest = render_manifest(&entries, &ctx.vps_ip, &ctx.app_dir_name, &created);

    let path = ctx.local_file(MANIFEST_FILE_NAME);
    fs::write(&path, manifest)
        .map_err(|error| DeployError::io(format!("Failed to write `{}`", path.display()), error))?;
    Ok(vec!["manifest written".to_string()])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

pub fn collect_manifest_entries(dir: &Path) -> DeployResult<Vec<ManifestEntry>> {
    let read_dir = fs::read_dir(dir)
        .map_err(|error| DeployError::io(format!("Failed to list `{}`", dir.display()), error))?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry
            .map_err(|error| DeployError::io(format!("Failed to list `{}`", dir.display()), error))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if name == MANIFEST_FILE_NAME || !path.is_file() {
            continue;
        }

        let (size_bytes, sha256) = hash_file(&path)?;
        entries.push(ManifestEntry {
            name,
            size_bytes,
            sha256,
        });
    }

    entries.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(entries)
}

fn hash_file(path: &Path) -> DeployResult<(u64, String)> {
    let read_error =
        |error: io::Error| DeployError::io(format!("Failed to read `{}`", path.display()), error);
    let mut file = File::open(path).map_err(read_error)?;
    let mut hasher = Sha256::new();
    let size_bytes = io::copy(&mut file, &mut hasher).map_err(read_error)?;
    Ok((size_bytes, format!("{:x}", hasher.finalize())))
}

pub fn render_manifest(entries: &[ManifestEntry], vps_ip: &str, app: &str, created: &str) -> String {
    let mut lines = vec![
        RULE.to_string(),
        "  VPS Backup Manifest".to_string(),
        format!("  Created : {created}"),
        format!("  VPS IP   : {vps_ip}"),
        format!("  App      : {app}"),
        RULE.to_string(),
        String::new(),
        "Contents:".to_string(),
    ];
    lines.extend(
        entries
            .iter()
            .map(|entry| format!("  {:<30} {}", entry.name, kilobytes(entry.size_bytes))),
    );

    lines.push(String::new());
    lines.push("Checksums (sha256):".to_string());
    lines.extend(
        entries
            .iter()
            .map(|entry| format!("  {}  {}", entry.sha256, entry.name)),
    );

    lines.extend([
        String::new(),
        "Restore notes:".to_string(),
        "  database.dump     → pg_restore or mysql < database.dump".to_string(),
        format!("  app_files.tar.gz  → extract into /home/{OPERATIONAL_USER}/"),
        "  vol_*.tar.gz      → mount volume, extract inside".to_string(),
        RULE.to_string(),
    ]);
    lines.join("\n")
}

fn kilobytes(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}

fn size_label(path: &Path) -> DeployResult<String> {
    let metadata = fs::metadata(path)
        .map_err(|error| DeployError::io(format!("Failed to stat `{}`", path.display()), error))?;
    Ok(kilobytes(metadata.len()))
}
