//! Chart archive (`.tgz`) reading and writing
//!
//! Archives follow Helm's layout: every entry lives under a single top-level
//! directory named after the chart (`stash/Chart.yaml`, `stash/templates/...`).

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::path::Component;
use tar::{Archive, Builder, Header};

use crate::chart::Chart;
use crate::error::{CoreError, Result};

/// Load a chart from gzipped tar bytes
pub fn load_archive(bytes: &[u8]) -> Result<Chart> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => components.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(CoreError::Archive {
                        message: format!("illegal path in chart archive: {}", path.display()),
                    });
                }
            }
        }

        // Drop the top-level chart directory
        if components.len() < 2 {
            continue;
        }
        let rel = components[1..].join("/");

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.push((rel, data));
    }

    if files.is_empty() {
        return Err(CoreError::Archive {
            message: "chart archive is empty".to_string(),
        });
    }

    Chart::from_files(files)
}

/// Package a chart into gzipped tar bytes
pub fn create_archive(chart: &Chart) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    append_chart(&mut builder, chart, chart.name())?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn append_chart<W: Write>(builder: &mut Builder<W>, chart: &Chart, prefix: &str) -> Result<()> {
    let metadata = serde_yaml::to_string(&chart.metadata)?;
    add_bytes_to_archive(builder, &format!("{prefix}/Chart.yaml"), metadata.as_bytes())?;

    let values = serde_yaml::to_string(&chart.values)?;
    add_bytes_to_archive(builder, &format!("{prefix}/values.yaml"), values.as_bytes())?;

    if let Some(schema) = &chart.schema {
        add_bytes_to_archive(builder, &format!("{prefix}/values.schema.json"), schema)?;
    }

    for file in chart.templates.iter().chain(chart.files.iter()) {
        add_bytes_to_archive(builder, &format!("{prefix}/{}", file.name), &file.data)?;
    }

    for sub in &chart.dependencies {
        append_chart(builder, sub, &format!("{prefix}/charts/{}", sub.name()))?;
    }

    Ok(())
}

/// Add bytes to a tar archive with a given path
fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0); // Reproducible builds: use epoch time
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}

/// Default archive filename for a chart, as published in Helm repositories
#[must_use]
pub fn default_archive_name(chart: &Chart) -> String {
    format!("{}-{}.tgz", chart.metadata.name, chart.metadata.version)
}
