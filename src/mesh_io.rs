//! Minimal readers for the mesh formats the viewer accepts (`.obj`, `.off`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use log::info;

/// Indexed triangle surface with one normal per vertex.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    /// Axis-aligned bounds, or `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(min, max), &p| (min.min(p), max.max(p))),
        )
    }

    /// Replaces the normals with area-weighted averages of the face normals.
    pub fn compute_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        for triangle in &self.triangles {
            let [i0, i1, i2] = triangle.map(|i| i as usize);
            let (Some(&p0), Some(&p1), Some(&p2)) = (
                self.positions.get(i0),
                self.positions.get(i1),
                self.positions.get(i2),
            ) else {
                continue;
            };
            let normal = (p1 - p0).cross(p2 - p0);
            if normal.length_squared() > f32::EPSILON {
                accum[i0] += normal;
                accum[i1] += normal;
                accum[i2] += normal;
            }
        }
        self.normals = accum.into_iter().map(Vec3::normalize_or_zero).collect();
    }
}

/// Loads a mesh, picking the reader from the file extension.
pub fn load_mesh(path: &Path) -> Result<TriMesh> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read mesh {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let mesh = match extension.as_deref() {
        Some("obj") => load_obj_from_str(&data),
        Some("off") => load_off_from_str(&data),
        _ => Err(anyhow!("unsupported mesh format")),
    }
    .with_context(|| format!("failed to load mesh {}", path.display()))?;
    info!(
        "loaded {} ({} vertices, {} faces)",
        path.display(),
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(mesh)
}

/// Parses Wavefront OBJ text. Polygons are fan-triangulated; vertices that
/// share a position but not a normal are split.
pub fn load_obj_from_str(data: &str) -> Result<TriMesh> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut faces: Vec<[FaceIndex; 3]> = Vec::new();

    for (line_no, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        match tag {
            "v" => positions.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid vertex on line {}", line_no + 1))?,
            ),
            "vn" => normals.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid normal on line {}", line_no + 1))?,
            ),
            "f" => {
                let polygon = parse_obj_face(parts)
                    .with_context(|| format!("invalid face on line {}", line_no + 1))?;
                fan(&polygon, &mut faces);
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        bail!("OBJ file does not define any vertices");
    }

    let mut mesh = weld(&positions, &normals, &faces)?;
    if mesh.normals.iter().any(|n| *n == Vec3::ZERO) {
        mesh.compute_normals();
    }
    Ok(mesh)
}

/// Parses Object File Format text (`OFF` header, counts, vertices, faces).
pub fn load_off_from_str(data: &str) -> Result<TriMesh> {
    let mut lines = data
        .lines()
        .enumerate()
        .map(|(no, line)| (no + 1, line.split('#').next().unwrap_or("").trim()))
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines.next().ok_or_else(|| anyhow!("empty OFF file"))?;
    let mut header_parts = header.split_whitespace();
    if header_parts.next() != Some("OFF") {
        bail!("missing OFF header");
    }
    let counts: Vec<&str> = match header_parts.next() {
        Some(first) => std::iter::once(first).chain(header_parts).collect(),
        None => {
            let (_, line) = lines.next().ok_or_else(|| anyhow!("missing OFF counts"))?;
            line.split_whitespace().collect()
        }
    };
    let [vertex_count, face_count] = match counts.as_slice() {
        [v, f, ..] => [
            v.parse::<usize>().context("invalid vertex count")?,
            f.parse::<usize>().context("invalid face count")?,
        ],
        _ => bail!("OFF counts need vertex and face totals"),
    };

    // Header counts are untrusted; every record needs at least one byte.
    let mut positions = Vec::with_capacity(vertex_count.min(data.len()));
    for _ in 0..vertex_count {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| anyhow!("expected {vertex_count} vertices"))?;
        positions.push(
            parse_vec3(line.split_whitespace())
                .with_context(|| format!("invalid vertex on line {line_no}"))?,
        );
    }

    let mut triangles = Vec::with_capacity(face_count.min(data.len()));
    for _ in 0..face_count {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| anyhow!("expected {face_count} faces"))?;
        let polygon = parse_off_face(line, vertex_count)
            .with_context(|| format!("invalid face on line {line_no}"))?;
        for i in 1..polygon.len() - 1 {
            triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
        }
    }

    let mut mesh = TriMesh {
        positions,
        normals: Vec::new(),
        triangles,
    };
    mesh.compute_normals();
    Ok(mesh)
}

fn parse_vec3<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let mut component = || -> Result<f32> {
        Ok(parts
            .next()
            .ok_or_else(|| anyhow!("missing vector component"))?
            .parse::<f32>()?)
    };
    Ok(Vec3::new(component()?, component()?, component()?))
}

fn parse_off_face(line: &str, vertex_count: usize) -> Result<Vec<u32>> {
    let mut parts = line.split_whitespace();
    let arity = parts
        .next()
        .ok_or_else(|| anyhow!("missing face arity"))?
        .parse::<usize>()?;
    if arity < 3 {
        bail!("faces must reference at least 3 vertices");
    }
    let polygon = parts
        .take(arity)
        .map(|part| -> Result<u32> {
            let index = part.parse::<u32>()?;
            if index as usize >= vertex_count {
                bail!("vertex index {index} out of range");
            }
            Ok(index)
        })
        .collect::<Result<Vec<_>>>()?;
    if polygon.len() != arity {
        bail!("face lists {} of {arity} vertices", polygon.len());
    }
    Ok(polygon)
}

#[derive(Debug, Clone, Copy)]
struct FaceIndex {
    v: i32,
    vn: i32,
}

fn parse_obj_face<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec<FaceIndex>> {
    let mut indices = Vec::new();
    for part in parts {
        let mut segments = part.split('/');
        let v = segments
            .next()
            .ok_or_else(|| anyhow!("missing vertex index"))?
            .parse::<i32>()?;
        // texture coordinates are not used
        let _ = segments.next();
        let vn = match segments.next() {
            Some(s) if !s.is_empty() => s.parse::<i32>()?,
            _ => 0,
        };
        indices.push(FaceIndex { v, vn });
    }
    if indices.len() < 3 {
        bail!("faces must reference at least 3 vertices");
    }
    Ok(indices)
}

fn fan(polygon: &[FaceIndex], faces: &mut Vec<[FaceIndex; 3]>) {
    for i in 1..polygon.len().saturating_sub(1) {
        faces.push([polygon[0], polygon[i], polygon[i + 1]]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    position: usize,
    normal: Option<usize>,
}

fn weld(positions: &[Vec3], normals: &[Vec3], faces: &[[FaceIndex; 3]]) -> Result<TriMesh> {
    let mut lookup: HashMap<Key, u32> = HashMap::new();
    let mut mesh = TriMesh::default();

    for face in faces {
        let mut triangle = [0u32; 3];
        for (corner, idx) in triangle.iter_mut().zip(face) {
            let position = resolve_index(idx.v, positions.len())
                .ok_or_else(|| anyhow!("invalid vertex index {}", idx.v))?;
            let normal = resolve_index(idx.vn, normals.len());
            let key = Key { position, normal };
            let next_index = mesh.positions.len() as u32;
            *corner = *lookup.entry(key).or_insert_with(|| {
                mesh.positions.push(positions[position]);
                mesh.normals
                    .push(normal.map(|i| normals[i]).unwrap_or(Vec3::ZERO));
                next_index
            });
        }
        mesh.triangles.push(triangle);
    }

    Ok(mesh)
}

/// OBJ indices are 1-based; negative values count back from the end.
fn resolve_index(index: i32, len: usize) -> Option<usize> {
    if index > 0 {
        let zero_based = index as usize - 1;
        (zero_based < len).then_some(zero_based)
    } else if index < 0 {
        let back = index.unsigned_abs() as usize;
        (back <= len).then(|| len - back)
    } else {
        None
    }
}
