//! Asset loading: STL meshes and XYZ point text.
//!
//! Loaders only build geometry; missing normals are filled in by the engine
//! when the object is added.

use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use cv_core::{Drawable, Geometry, GeometryError, Material, ValueRamp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("STL parse error: {0}")]
    Stl(String),
    #[error("line {line}: {message}")]
    Xyz { line: usize, message: String },
    #[error("unsupported file type '{0}'")]
    Unsupported(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Supported file extensions, lowercase.
pub const EXTENSIONS: &[&str] = &["stl", "xyz"];

/// Loads a file into a drawable named after the file stem.
pub fn load_path(path: &Path, color: [f32; 4]) -> Result<Drawable, LoadError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let drawable = match extension.as_str() {
        "stl" => {
            let file = std::fs::File::open(path)?;
            let geometry = read_stl(&mut BufReader::new(file))?;
            Drawable::mesh(name, geometry, Material::lit(color))
        }
        "xyz" => {
            let text = std::fs::read_to_string(path)?;
            points_drawable(name, parse_xyz(&text)?, color)
        }
        other => return Err(LoadError::Unsupported(other.to_string())),
    };
    tracing::info!(
        path = %path.display(),
        name = %drawable.name,
        vertices = drawable.geometry.vertex_count(),
        "asset loaded"
    );
    Ok(drawable)
}

/// Reads binary or ASCII STL into indexed geometry.
pub fn read_stl<R: Read + Seek>(reader: &mut R) -> Result<Geometry, LoadError> {
    let mesh = stl_io::read_stl(reader).map_err(|e| LoadError::Stl(e.to_string()))?;
    let positions: Vec<[f32; 3]> = mesh.vertices.iter().map(|v| [v[0], v[1], v[2]]).collect();
    let indices: Vec<u32> = mesh
        .faces
        .iter()
        .flat_map(|f| f.vertices.iter().map(|&i| i as u32))
        .collect();
    let geometry = Geometry::new(positions).with_indices(indices);
    geometry.validate()?;
    Ok(geometry)
}

/// Reads STL from memory.
pub fn read_stl_bytes(bytes: &[u8]) -> Result<Geometry, LoadError> {
    read_stl(&mut Cursor::new(bytes))
}

/// Parses whitespace- or comma-separated `x y z [value]` lines. Blank lines
/// and lines starting with `#` are skipped. The value column must be present
/// on every point or on none.
pub fn parse_xyz(text: &str) -> Result<Geometry, LoadError> {
    let mut positions = Vec::new();
    let mut values = Vec::new();
    let mut has_values: Option<bool> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields = trimmed
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty())
            .map(|f| {
                f.parse::<f32>().map_err(|_| LoadError::Xyz {
                    line,
                    message: format!("'{f}' is not a number"),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        let with_value = match fields.len() {
            3 => false,
            4 => true,
            n => {
                return Err(LoadError::Xyz {
                    line,
                    message: format!("expected 3 or 4 columns, found {n}"),
                });
            }
        };
        if *has_values.get_or_insert(with_value) != with_value {
            return Err(LoadError::Xyz {
                line,
                message: "value column must be present on every point or none".to_string(),
            });
        }
        positions.push([fields[0], fields[1], fields[2]]);
        if with_value {
            values.push(fields[3]);
        }
    }

    let mut geometry = Geometry::new(positions);
    if has_values == Some(true) {
        geometry = geometry.with_generic(values);
    }
    geometry.validate()?;
    Ok(geometry)
}

/// Points drawable; a value column selects the color ramp.
pub fn points_drawable(name: String, geometry: Geometry, color: [f32; 4]) -> Drawable {
    match geometry.generic_range() {
        Some((min, max)) => {
            Drawable::points(name, geometry, Material::value_mapped(ValueRamp::new(min, max)))
        }
        None => Drawable::points(name, geometry, Material::points(color)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascii_tetra() -> &'static str {
        "solid t
facet normal 0 0 -1
 outer loop
  vertex 0 0 0
  vertex 1 0 0
  vertex 0 1 0
 endloop
endfacet
facet normal 0 -1 0
 outer loop
  vertex 0 0 0
  vertex 0 0 1
  vertex 1 0 0
 endloop
endfacet
endsolid t
"
    }

    #[test]
    fn test_stl_is_indexed() {
        let geometry = read_stl_bytes(ascii_tetra().as_bytes()).unwrap();
        assert_eq!(geometry.vertex_count(), 4);
        assert_eq!(geometry.triangle_count(), 2);
        assert!(geometry.normals.is_none());
    }

    #[test]
    fn test_garbage_stl_is_an_error() {
        assert!(matches!(read_stl_bytes(b"hello"), Err(LoadError::Stl(_))));
    }

    #[test]
    fn test_xyz_with_values() {
        let geometry = parse_xyz("# header\n0 0 0 1.5\n1,0,0,2.5\n\n0 1 0 -1\n").unwrap();
        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.generic.as_deref(), Some(&[1.5, 2.5, -1.0][..]));
    }

    #[test]
    fn test_xyz_without_values() {
        let geometry = parse_xyz("0 0 0\n1 2 3\n").unwrap();
        assert!(!geometry.has_generic());
        assert_eq!(geometry.positions[1], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_xyz_errors_name_the_line() {
        match parse_xyz("0 0 0\n1 2\n") {
            Err(LoadError::Xyz { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
        match parse_xyz("0 0 0 1\n1 2 3\n") {
            Err(LoadError::Xyz { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse_xyz("0 x 0\n"), Err(LoadError::Xyz { line: 1, .. })));
    }

    #[test]
    fn test_empty_xyz_is_rejected() {
        assert!(matches!(parse_xyz("# nothing\n"), Err(LoadError::Geometry(_))));
    }

    #[test]
    fn test_value_points_use_ramp() {
        let geometry = parse_xyz("0 0 0 1\n1 0 0 3\n").unwrap();
        let drawable = points_drawable("p".into(), geometry, [1.0; 4]);
        let material = drawable.primary_material().unwrap();
        assert_eq!(material.params.ramp.map(|r| (r.min, r.max)), Some((1.0, 3.0)));
    }

    #[test]
    fn test_unknown_extension() {
        let result = load_path(Path::new("model.obj"), [1.0; 4]);
        assert!(matches!(result, Err(LoadError::Unsupported(e)) if e == "obj"));
    }
}
