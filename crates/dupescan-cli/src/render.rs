use dupescan_core::reporter::Report;
use dupescan_core::Error;
use humansize::{format_size, BINARY};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Print the report to stdout as aligned text tables.
pub fn render_console(report: &Report) -> Result<(), Error> {
    let s = &report.summary;
    println!("── Store summary ──────────────────────────────────────");
    println!("  files:            {}", s.total_files);
    println!(
        "  total size:       {}",
        format_size(s.total_bytes.max(0) as u64, BINARY)
    );
    println!("  hashed files:     {}", s.hashed_files);
    println!("  duplicate files:  {}", s.duplicate_files);
    println!("  duplicate groups: {}", s.duplicate_groups);
    println!(
        "  wasted bytes:     {}",
        format_size(s.wasted_bytes.max(0) as u64, BINARY)
    );

    println!();
    println!("── Top {} largest files ───────────────────────────────", report.top_files.len());
    println!("{:>5}  {:>12}  {:<19}  {:<6}  path", "rank", "size", "modified", "tag");
    for (i, f) in report.top_files.iter().enumerate() {
        println!(
            "{:>5}  {:>12}  {:<19}  {:<6}  {}",
            i + 1,
            format_size(f.size.max(0) as u64, BINARY),
            f.mtime.get(..19).unwrap_or(&f.mtime),
            f.tag.as_deref().unwrap_or(""),
            f.path,
        );
    }

    println!();
    println!("── Duplicate groups ({}) ──────────────────────────────", report.duplicate_groups.len());
    for group in &report.duplicate_groups {
        println!(
            "{}  x{}  {}",
            group.digest,
            group.file_count,
            format_size(group.total_size.max(0) as u64, BINARY)
        );
        for member in &group.files {
            println!("    {}", member.path);
        }
    }
    Ok(())
}

pub fn render_json(report: &Report, path: &Path) -> Result<Vec<PathBuf>, Error> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|e| Error::Other(format!("JSON encoding failed: {e}")))?;
    Ok(vec![path.to_path_buf()])
}

/// Spreadsheet output: one CSV for the top-files sheet and a sibling
/// `<stem>_duplicates.csv` for the duplicate groups.
pub fn render_spreadsheet(report: &Report, path: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut top = csv::Writer::from_path(path).map_err(csv_err)?;
    top.write_record(["rank", "size", "path", "name", "mtime", "digest", "tag"])
        .map_err(csv_err)?;
    for (i, f) in report.top_files.iter().enumerate() {
        top.write_record([
            (i + 1).to_string(),
            f.size.to_string(),
            f.path.clone(),
            f.name.clone(),
            f.mtime.clone(),
            f.digest.clone().unwrap_or_default(),
            f.tag.clone().unwrap_or_default(),
        ])
        .map_err(csv_err)?;
    }
    top.flush()?;

    let dup_path = sibling_with_suffix(path, "_duplicates");
    let mut dup = csv::Writer::from_path(&dup_path).map_err(csv_err)?;
    dup.write_record(["digest", "file_count", "path", "name", "size", "mtime", "tag"])
        .map_err(csv_err)?;
    for group in &report.duplicate_groups {
        for member in &group.files {
            dup.write_record([
                group.digest.clone(),
                group.file_count.to_string(),
                member.path.clone(),
                member.name.clone(),
                member.size.to_string(),
                member.mtime.clone(),
                member.tag.clone().unwrap_or_default(),
            ])
            .map_err(csv_err)?;
        }
    }
    dup.flush()?;
    Ok(vec![path.to_path_buf(), dup_path])
}

pub fn render_html(report: &Report, path: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut w = BufWriter::new(File::create(path)?);
    let s = &report.summary;
    writeln!(w, "<!DOCTYPE html>")?;
    writeln!(w, "<html><head><meta charset=\"utf-8\"><title>dupescan report</title>")?;
    writeln!(
        w,
        "<style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:4px 8px;text-align:left}}\
         th{{background:#eee}}code{{font-size:0.9em}}</style></head><body>"
    )?;
    writeln!(w, "<h1>dupescan report</h1>")?;

    writeln!(w, "<h2>Summary</h2><table>")?;
    writeln!(w, "<tr><th>Files</th><td>{}</td></tr>", s.total_files)?;
    writeln!(
        w,
        "<tr><th>Total size</th><td>{}</td></tr>",
        format_size(s.total_bytes.max(0) as u64, BINARY)
    )?;
    writeln!(w, "<tr><th>Hashed files</th><td>{}</td></tr>", s.hashed_files)?;
    writeln!(w, "<tr><th>Duplicate files</th><td>{}</td></tr>", s.duplicate_files)?;
    writeln!(w, "<tr><th>Duplicate groups</th><td>{}</td></tr>", s.duplicate_groups)?;
    writeln!(
        w,
        "<tr><th>Wasted</th><td>{}</td></tr></table>",
        format_size(s.wasted_bytes.max(0) as u64, BINARY)
    )?;

    writeln!(w, "<h2>Top {} largest files</h2>", report.top_files.len())?;
    writeln!(
        w,
        "<table><tr><th>#</th><th>Size</th><th>Path</th><th>Modified</th><th>Digest</th><th>Tag</th></tr>"
    )?;
    for (i, f) in report.top_files.iter().enumerate() {
        writeln!(
            w,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td><td>{}</td></tr>",
            i + 1,
            format_size(f.size.max(0) as u64, BINARY),
            escape(&f.path),
            escape(&f.mtime),
            f.digest.as_deref().unwrap_or(""),
            escape(f.tag.as_deref().unwrap_or("")),
        )?;
    }
    writeln!(w, "</table>")?;

    writeln!(w, "<h2>Duplicate groups ({})</h2>", report.duplicate_groups.len())?;
    for group in &report.duplicate_groups {
        writeln!(
            w,
            "<h3><code>{}</code>: {} files, {}</h3><ul>",
            group.digest,
            group.file_count,
            format_size(group.total_size.max(0) as u64, BINARY)
        )?;
        for member in &group.files {
            writeln!(w, "<li>{}</li>", escape(&member.path))?;
        }
        writeln!(w, "</ul>")?;
    }
    writeln!(w, "</body></html>")?;
    w.flush()?;
    Ok(vec![path.to_path_buf()])
}

fn csv_err(e: csv::Error) -> Error {
    Error::Other(format!("CSV write failed: {e}"))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    path.with_file_name(format!("{stem}{suffix}.{ext}"))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
