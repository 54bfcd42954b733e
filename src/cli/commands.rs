//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::cache::{ChecksumStatus, StemRegistration};
use crate::config::Settings;
use crate::merge::{
    merge_stems, verify_directory, verify_integrity, IntegrityMismatch, MergeReport,
    PathStemSource, TimingTable,
};
use crate::template::{list_templates, load_template, TemplateVars};

/// Merge explicit files in order; the timing map is keyed by file stem.
pub fn merge(
    settings: &Settings,
    files: &[PathBuf],
    output: &Path,
    timing: Option<&Path>,
) -> Result<MergeReport> {
    let table = match timing {
        Some(path) => load_timing(path)?,
        None => TimingTable::new(),
    };

    let source = PathStemSource::from_paths(files);
    let report = merge_stems(&source, source.keys(), &table, output, &settings.merge_options())
        .with_context(|| format!("Failed to merge into {}", output.display()))?;

    print_report(&report);
    Ok(report)
}

fn load_timing(path: &Path) -> Result<TimingTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read timing map {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Timing map {} is not valid JSON", path.display()))?;
    let table = TimingTable::from_json(&value)?;
    info!(
        "Loaded {} timing entries from {} ({} skipped)",
        table.len(),
        path.display(),
        table.skipped()
    );
    Ok(table)
}

/// Check stem formats against the first; returns the mismatches found.
pub fn verify(files: &[PathBuf], dir: Option<&Path>, json: bool) -> Result<Vec<IntegrityMismatch>> {
    let mismatches = match dir {
        Some(dir) => verify_directory(dir)
            .with_context(|| format!("Failed to verify {}", dir.display()))?,
        None => {
            let source = PathStemSource::from_paths(files);
            verify_integrity(&source, source.keys())?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&mismatches)?);
    } else if mismatches.is_empty() {
        println!("All stems consistent.");
    } else {
        println!("Inconsistent stems:");
        for m in &mismatches {
            println!("  {:<32} {} Hz / {} ch", m.id, m.sample_rate, m.channels);
        }
    }

    Ok(mismatches)
}

/// Assemble a message from a template, preferring cached stems.
pub fn assemble(
    settings: &Settings,
    name: &str,
    developer: &str,
    template: Option<&str>,
    output: Option<&Path>,
) -> Result<MergeReport> {
    info!("Assembling message for {} / {}", name, developer);

    let template_path = settings.template_path(template);
    let template = load_template(&template_path)
        .with_context(|| format!("Failed to load template {}", template_path.display()))?;

    let vars = TemplateVars::new(name, developer);
    let segments = template.segments_or_fallback(&vars);
    let table = template.timing_table(&vars)?;

    let registry = settings.registry();
    let mut source = PathStemSource::new();
    let mut ids = Vec::with_capacity(segments.len());
    for segment in &segments {
        let path = match registry.get_cached_stem(&segment.id, settings.cache_ttl_days) {
            Some(path) => {
                info!("Cached stem: {}", segment.id);
                path
            }
            None => settings.stems_dir.join(format!("{}.wav", segment.id)),
        };
        source.insert(segment.id.clone(), path);
        ids.push(segment.id.clone());
    }
    info!("{} stems ready", ids.len());

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => settings
            .output_dir
            .join(format!("{}_{}_template.wav", name, developer)),
    };

    let report = merge_stems(&source, &ids, &table, &output, &settings.merge_options())
        .with_context(|| format!("Failed to assemble {}", output.display()))?;

    print_report(&report);
    Ok(report)
}

/// List template files.
pub fn templates(settings: &Settings) -> Result<()> {
    let names = list_templates(&settings.template_dir)?;
    if names.is_empty() {
        println!("No templates in {}", settings.template_dir.display());
        return Ok(());
    }

    println!("Templates ({}):", settings.template_dir.display());
    for name in names {
        let marker = if name == settings.default_template { " (default)" } else { "" };
        println!("  {}{}", name, marker);
    }
    Ok(())
}

/// Print cache statistics.
pub fn cache_summary(settings: &Settings) -> Result<()> {
    let summary = settings.registry().summarize(settings.cache_ttl_days);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Sweep expired stems.
pub fn cache_cleanup(settings: &Settings, max_age_days: Option<i64>) -> Result<usize> {
    let max_age = max_age_days.unwrap_or(settings.cache_ttl_days);
    let removed = settings.registry().cleanup_expired_stems(max_age)?;
    println!("Removed {} expired stems (older than {} days)", removed, max_age);
    Ok(removed)
}

/// Register a stem file.
pub fn cache_register(
    settings: &Settings,
    name: &str,
    path: &Path,
    text: &str,
    voice_id: Option<&str>,
    dataset: Option<&str>,
) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("Stem file not found: {}", path.display());
    }

    let mut registration = StemRegistration::new(name, text, path);
    if let Some(voice) = voice_id {
        registration = registration.with_voice(voice);
    }
    if let Some(dataset) = dataset {
        registration = registration.rotational(dataset);
    }

    let entry = settings.registry().register_stem(registration)?;
    println!("Registered {} (v{}) @ {}", name, entry.version, entry.path.display());
    Ok(())
}

/// Compare a stem's file with its recorded checksum; true when intact.
pub fn cache_verify(settings: &Settings, name: &str) -> Result<bool> {
    let status = settings.registry().verify_checksum(name)?;
    match &status {
        ChecksumStatus::Match => println!("{}: checksum OK", name),
        ChecksumStatus::NotRecorded => println!("{}: no checksum recorded", name),
        ChecksumStatus::Mismatch { expected, actual } => {
            println!("{}: checksum MISMATCH", name);
            println!("  expected {}", expected);
            println!("  actual   {}", actual);
        }
    }
    Ok(!matches!(status, ChecksumStatus::Mismatch { .. }))
}

/// Print effective settings.
pub fn show_config(settings: &Settings) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&settings.summary()?)?);
    Ok(())
}

fn print_report(report: &MergeReport) {
    println!("Merged: {}", report.output_path.display());
    println!("Format: {}", report.format);
    println!(
        "Length: {} frames ({:.3}s), {} bytes, peak {:.3}",
        report.frames, report.duration_secs, report.bytes_written, report.peak
    );
    if !report.transitions.is_empty() {
        println!("{:-<60}", "");
        for t in &report.transitions {
            println!(
                "  {} -> {}: gap {} / xfade {} frames{}",
                t.from,
                t.to,
                t.gap_samples,
                t.crossfade_samples,
                if t.used_default { " (default)" } else { "" }
            );
        }
    }
}
