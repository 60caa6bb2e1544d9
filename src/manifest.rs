//! `.ecfg` manifest output: a zip archive holding a single `Config.xml`.

use crate::harvest::HarvestResults;
use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use uuid::Uuid;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const CONFIG_FILE_NAME: &str = "Config.xml";
pub const ECFG_EXTENSION: &str = "ecfg";

/// `{GUID}` in uppercase.
pub fn braced_upper(id: &Uuid) -> String {
    format!("{:X}", id.braced())
}

/// `<{GUID}>_<name>.ecfg`
pub fn ecfg_file_name(assembly_name: &str, assembly_guid: &Uuid) -> String {
    format!(
        "{}_{assembly_name}.{ECFG_EXTENSION}",
        braced_upper(assembly_guid)
    )
}

/// Render the category manifest document.
pub fn render_config_xml(results: &HarvestResults) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;

    let mut root = BytesStart::new("ESRI.Configuration");
    root.push_attribute(("ver", "1"));
    writer.write_event(Event::Start(root))?;

    if results.categories.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("Categories")))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new("Categories")))?;
        for (category, classes) in &results.categories {
            let mut element = BytesStart::new("Category");
            element.push_attribute(("CATID", braced_upper(category).as_str()));
            writer.write_event(Event::Start(element))?;
            for class_id in classes {
                let mut class = BytesStart::new("Class");
                class.push_attribute(("CLSID", braced_upper(class_id).as_str()));
                writer.write_event(Event::Empty(class))?;
            }
            writer.write_event(Event::End(BytesEnd::new("Category")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("Categories")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("ESRI.Configuration")))?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("manifest is not valid UTF-8")
}

/// Write the `.ecfg` archive into `output_folder` and return its path.
///
/// `Config.xml` is staged in a temporary directory, zipped into a temporary
/// file next to the destination, and persisted over any existing file or
/// directory of the same name.
pub fn write_ecfg(results: &HarvestResults, output_folder: &Path) -> Result<PathBuf> {
    let destination =
        output_folder.join(ecfg_file_name(&results.assembly_name, &results.assembly_guid));

    let staging = TempDir::new().context("creating manifest staging directory")?;
    let config_path = staging.path().join(CONFIG_FILE_NAME);
    fs::write(&config_path, render_config_xml(results)?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    let archive = NamedTempFile::new_in(output_folder)
        .with_context(|| format!("creating archive in {}", output_folder.display()))?;
    package_directory(staging.path(), archive.as_file())?;

    if destination.is_dir() {
        fs::remove_dir_all(&destination)
            .with_context(|| format!("removing {}", destination.display()))?;
    }
    archive
        .persist(&destination)
        .with_context(|| format!("writing {}", destination.display()))?;
    Ok(destination)
}

/// Zip the regular files directly inside `dir`, entries named by file name.
fn package_directory(dir: &Path, out: &fs::File) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .with_context(|| format!("reading {}", dir.display()))?;
    entries.sort();

    let mut zip = ZipWriter::new(out);
    for path in entries.iter().filter(|path| path.is_file()) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name.as_str(), SimpleFileOptions::default())
            .with_context(|| format!("adding {name} to archive"))?;
        let contents = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        zip.write_all(&contents)?;
    }
    zip.finish().context("finalizing archive")?;
    Ok(())
}

/// Echo the harvested categories in the console format of the manifest.
pub fn describe(results: &HarvestResults) -> Vec<String> {
    let mut lines = Vec::new();
    for (category, classes) in &results.categories {
        lines.push(format!("Component Category: {category}"));
        for class_id in classes {
            lines.push(format!("   <Class CLSID=\"{}", braced_upper(class_id)));
        }
    }
    lines
}
