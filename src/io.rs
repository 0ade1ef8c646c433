// Mesh persistence: PLY load/save, STL import, pass-stack dumps.

use crate::geometry::{Point3D, Vector3D};
use crate::mesh::{Mesh, MeshError};
use log::info;
use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Load a mesh, dispatching on the file extension (`.ply` or `.stl`).
pub fn load_mesh<P: AsRef<Path>>(path: P) -> Result<Mesh, MeshError> {
    let extension = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("ply") => load_ply(path),
        Some("stl") => load_stl(path),
        _ => Err(MeshError::InvalidFormat),
    }
}

/// Read a PLY mesh. Vertex normals are picked up when every vertex
/// carries nx/ny/nz; polygonal faces are fan-triangulated.
pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<Mesh, MeshError> {
    let file = File::open(&path).map_err(|e| MeshError::LoadError(e.to_string()))?;
    let mut reader = BufReader::new(file);

    let ply = Parser::<DefaultElement>::new()
        .read_ply(&mut reader)
        .map_err(|e| MeshError::LoadError(e.to_string()))?;

    let vertex_elements = ply.payload.get("vertex").ok_or(MeshError::InvalidFormat)?;
    let mut vertices = Vec::with_capacity(vertex_elements.len());
    let mut normals = Vec::with_capacity(vertex_elements.len());
    for element in vertex_elements {
        let x = scalar(element, "x").ok_or(MeshError::InvalidFormat)?;
        let y = scalar(element, "y").ok_or(MeshError::InvalidFormat)?;
        let z = scalar(element, "z").ok_or(MeshError::InvalidFormat)?;
        vertices.push(Point3D::new(x, y, z));

        if let (Some(nx), Some(ny), Some(nz)) = (
            scalar(element, "nx"),
            scalar(element, "ny"),
            scalar(element, "nz"),
        ) {
            normals.push(Vector3D::new(nx, ny, nz));
        }
    }

    let face_elements = ply.payload.get("face").ok_or(MeshError::InvalidFormat)?;
    let mut triangles = Vec::with_capacity(face_elements.len());
    for element in face_elements {
        let indices = element
            .get("vertex_indices")
            .or_else(|| element.get("vertex_index"))
            .and_then(index_list)
            .ok_or(MeshError::InvalidFormat)?;
        // Fan-triangulate polygons
        for i in 1..indices.len().saturating_sub(1) {
            triangles.push([indices[0], indices[i], indices[i + 1]]);
        }
    }

    let mut mesh = Mesh::new(vertices, triangles)?;
    if normals.len() == mesh.num_vertices() {
        mesh.vertex_normals = Some(normals);
    }
    info!(
        "loaded {:?}: {} vertices, {} cells",
        path.as_ref(),
        mesh.num_vertices(),
        mesh.num_cells()
    );
    Ok(mesh)
}

/// Write a mesh as ASCII PLY, with normals when recorded.
pub fn save_ply<P: AsRef<Path>>(path: P, mesh: &Mesh) -> Result<(), MeshError> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    if mesh.vertex_normals.is_some() {
        for name in ["nx", "ny", "nz"] {
            vertex_def.properties.add(PropertyDef::new(
                name.to_string(),
                PropertyType::Scalar(ScalarType::Float),
            ));
        }
    }
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    ply.header.elements.add(face_def);

    let mut vertex_payload = Vec::with_capacity(mesh.num_vertices());
    for (index, vertex) in mesh.vertices.iter().enumerate() {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Float(vertex.x as f32));
        element.insert("y".to_string(), Property::Float(vertex.y as f32));
        element.insert("z".to_string(), Property::Float(vertex.z as f32));
        if let Some(normals) = &mesh.vertex_normals {
            let n = normals[index];
            element.insert("nx".to_string(), Property::Float(n.x as f32));
            element.insert("ny".to_string(), Property::Float(n.y as f32));
            element.insert("nz".to_string(), Property::Float(n.z as f32));
        }
        vertex_payload.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertex_payload);

    let mut face_payload = Vec::with_capacity(mesh.num_cells());
    for tri in &mesh.triangles {
        let mut element = DefaultElement::new();
        element.insert(
            "vertex_indices".to_string(),
            Property::ListInt(tri.iter().map(|&i| i as i32).collect()),
        );
        face_payload.push(element);
    }
    ply.payload.insert("face".to_string(), face_payload);

    let file = File::create(&path).map_err(|e| MeshError::SaveError(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| MeshError::SaveError(e.to_string()))?;
    Ok(())
}

/// Load mesh from STL file
pub fn load_stl<P: AsRef<Path>>(path: P) -> Result<Mesh, MeshError> {
    let mut file = File::open(&path).map_err(|e| MeshError::LoadError(e.to_string()))?;
    let stl = stl_io::read_stl(&mut file).map_err(|e| MeshError::LoadError(e.to_string()))?;

    // IndexedMesh stores deduplicated vertices plus indexed triangles
    let vertices = stl
        .vertices
        .iter()
        .map(|v| Point3D::new(v[0] as f64, v[1] as f64, v[2] as f64))
        .collect();
    let triangles = stl
        .faces
        .iter()
        .map(|face| {
            [
                face.vertices[0] as u32,
                face.vertices[1] as u32,
                face.vertices[2] as u32,
            ]
        })
        .collect();

    Mesh::new(vertices, triangles)
}

/// Persist a pass stack as `mesh_0.ply .. mesh_{k-1}.ply` for inspection.
pub fn save_pass_stack<P: AsRef<Path>>(directory: P, stack: &[Mesh]) -> Result<(), MeshError> {
    for (index, mesh) in stack.iter().enumerate() {
        let path = directory.as_ref().join(format!("mesh_{index}.ply"));
        save_ply(&path, mesh)?;
        info!("{} saved successfully", path.display());
    }
    Ok(())
}

fn scalar(element: &DefaultElement, name: &str) -> Option<f64> {
    match element.get(name)? {
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        _ => None,
    }
}

fn index_list(property: &Property) -> Option<Vec<u32>> {
    match property {
        Property::ListChar(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListUChar(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListShort(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListUShort(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListInt(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListUInt(v) => Some(v.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("grindpath_{}_{name}", std::process::id()))
    }

    fn pyramid() -> Mesh {
        let vertices = vec![
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(1.0, 0.0, 0.0),
            Point3D::new(0.0, 1.0, 0.0),
            Point3D::new(0.0, 0.0, 1.0),
        ];
        let triangles = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mut mesh = Mesh::new(vertices, triangles).unwrap();
        mesh.generate_vertex_normals();
        mesh
    }

    #[test]
    fn test_ply_round_trip() {
        let mesh = pyramid();
        let path = scratch_path("round_trip.ply");

        save_ply(&path, &mesh).unwrap();
        let loaded = load_ply(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.num_vertices(), mesh.num_vertices());
        assert_eq!(loaded.num_cells(), mesh.num_cells());
        assert_eq!(loaded.triangles, mesh.triangles);
        for (a, b) in loaded.vertices.iter().zip(&mesh.vertices) {
            assert!((a - b).norm() < 1e-6);
        }

        let loaded_normals = loaded.vertex_normals.expect("normals survive the trip");
        let original_normals = mesh.vertex_normals.as_ref().unwrap();
        for (a, b) in loaded_normals.iter().zip(original_normals) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn test_load_mesh_rejects_unknown_extension() {
        assert!(matches!(
            load_mesh("mesh.obj"),
            Err(MeshError::InvalidFormat)
        ));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        assert!(matches!(
            load_ply("/nonexistent/grindpath.ply"),
            Err(MeshError::LoadError(_))
        ));
    }

    #[test]
    fn test_save_pass_stack_names_files() {
        let mesh = pyramid();
        let dir = scratch_path("stack");
        std::fs::create_dir_all(&dir).unwrap();

        save_pass_stack(&dir, &[mesh.clone(), mesh]).unwrap();
        assert!(dir.join("mesh_0.ply").exists());
        assert!(dir.join("mesh_1.ply").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
