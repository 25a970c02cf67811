//! Domain state persistence: frame layout, state initialisation and the
//! rigid-to-FEM remap.

use log::warn;
use regex::Regex;
use vek::{Mat3, Vec3};

use crate::{
    body::{energy, Body, BodyFlags, BodyId, BodyKind, BulkMaterial, Scheme},
    constraint::{ConState, Constraint, ConstraintId, ConstraintKind, Z_SIZE},
    domain::Domain,
    error::{Error, Result},
    geom::{convex::ConvexFace, Convex, Ellipsoid, Sphere},
    mesh::{Element, ElementKind, Mesh, MeshFace},
    shape::{Primitive, Shape},
    timer::Timers,
};

use super::pbf::{FrameCursor, FrameReader, FrameWriter};

/// IO version emitted by this writer.
///
/// Version gates on read: contact `V` appears for versions above one, the
/// SPRING `Z` vector for version four and later; state initialisation needs
/// at least three.
pub const IOVER: u32 = 4;

/// Write one output frame: domain header, new body records, body states,
/// constraints and the accumulated timers.
pub fn write_state(
    dom: &Domain,
    new_bodies: &[BodyId],
    timers: &mut Timers,
    frame: &mut FrameWriter,
) {
    frame.label("DOM");

    frame.label("IOVER");
    frame.ints(&[IOVER as i32]);

    frame.label("STEP");
    frame.doubles(&[dom.step]);

    frame.label("MERIT");
    frame.doubles(&[dom.merit]);

    // Complete records of bodies created since the last frame
    if !new_bodies.is_empty() {
        frame.label("NEWBOD");
        frame.ints(&[new_bodies.len() as i32]);
        for id in new_bodies {
            if let Some(body) = dom.bodies.get(id) {
                pack_body(body, frame);
            }
        }
    }

    frame.label("BODS");
    let ids = dom.sorted_body_ids();
    frame.ints(&[ids.len() as i32]);
    for id in &ids {
        let body = &dom.bodies[id];

        frame.uints(&[id.0]);
        if let Some(label) = &body.label {
            // Labeled body records support random access
            frame.label(label);
            frame.string(label);
        } else {
            frame.string("");
        }
        write_body_state(body, frame);
    }

    frame.label("CONS");
    let cids = dom.sorted_constraint_ids();
    frame.ints(&[cids.len() as i32]);
    for id in &cids {
        write_constraint(&dom.constraints[id], frame);
    }

    frame.label("TIMERS");
    frame.ints(&[timers.len() as i32]);
    for (label, total) in timers.totals() {
        frame.string(label);
        frame.doubles(&[total]);
    }
    timers.clear();
}

/// Write the state record of one body: kind, sizes, configuration, velocity
/// and energy.
fn write_body_state(body: &Body, frame: &mut FrameWriter) {
    frame.ints(&[
        body.kind.tag(),
        body.conf_size() as i32,
        body.dofs() as i32,
    ]);
    frame.doubles(&body.conf);
    frame.doubles(&body.velo);
    frame.doubles(&body.energy[..body.energy_size()]);
}

/// Read the state record of one body in place.
fn read_body_state(body: &mut Body, cursor: &mut FrameCursor) -> Result<()> {
    let mut header = [0i32; 3];
    cursor.ints(&mut header)?;

    let (kind, conf, dofs) = (header[0], header[1] as usize, header[2] as usize);
    if kind != body.kind.tag() {
        return Err(Error::StateMismatch {
            id: body.id,
            what: "kind",
            stored: kind as usize,
            expected: body.kind.tag() as usize,
        });
    }
    if conf != body.conf_size() {
        return Err(Error::StateMismatch {
            id: body.id,
            what: "configuration size",
            stored: conf,
            expected: body.conf_size(),
        });
    }
    if dofs != body.dofs() {
        return Err(Error::StateMismatch {
            id: body.id,
            what: "dof count",
            stored: dofs,
            expected: body.dofs(),
        });
    }

    cursor.doubles(&mut body.conf)?;
    cursor.doubles(&mut body.velo)?;
    let size = body.energy_size();
    cursor.doubles(&mut body.energy[..size])?;
    body.prev_velo.copy_from_slice(&body.velo);

    Ok(())
}

/// Consume a body state record without a matching live body.
fn mock_read_body_state(cursor: &mut FrameCursor, parallel: bool) -> Result<()> {
    let mut header = [0i32; 3];
    cursor.ints(&mut header)?;

    let mut conf = vec![0.0; header[1] as usize];
    let mut velo = vec![0.0; header[2] as usize];
    cursor.doubles(&mut conf)?;
    cursor.doubles(&mut velo)?;

    let energy_size = match header[0] {
        0 => 0,
        1 => 4,
        _ => 5,
    };
    let mut energy = vec![0.0; energy_size];
    cursor.doubles(&mut energy)?;

    if parallel {
        let mut rank = [0i32];
        cursor.ints(&mut rank)?;
    }

    Ok(())
}

/// Write one constraint record.
fn write_constraint(con: &Constraint, frame: &mut FrameWriter) {
    frame.uints(&[con.id.0]);
    frame.ints(&[con.kind.tag()]);

    frame.doubles(&[con.r.x, con.r.y, con.r.z]);
    frame.doubles(&[con.u.x, con.u.y, con.u.z]);
    if con.kind == ConstraintKind::Contact {
        frame.doubles(&[con.v.x, con.v.y, con.v.z]);
    }
    frame.doubles(&[con.point.x, con.point.y, con.point.z]);
    frame.doubles(&con.base.into_row_array());
    frame.doubles(&[con.merit]);

    frame.uints(&[con.master.0]);
    frame.uints(&[con.slave.map(|s| s.0).unwrap_or(0)]);

    if con.kind == ConstraintKind::Contact {
        frame.doubles(&[
            con.mat.friction,
            con.mat.cohesion,
            con.mat.restitution,
            con.mat.spring,
            con.mat.dashpot,
        ]);
        frame.ints(&[if con.state.contains(ConState::COHESIVE) { 1 } else { 0 }]);
        frame.doubles(&[con.area]);
        frame.doubles(&[con.gap]);
        frame.ints(&con.spair);
    }

    if matches!(
        con.kind,
        ConstraintKind::RigidLink | ConstraintKind::VeloDir | ConstraintKind::Spring
    ) {
        frame.doubles(&con.z);
    }
}

/// Read one constraint record.
fn read_constraint(cursor: &mut FrameCursor, iover: u32, parallel: bool) -> Result<Constraint> {
    let mut id = [0u32];
    cursor.uints(&mut id)?;
    let mut kind = [0i32];
    cursor.ints(&mut kind)?;
    let kind = ConstraintKind::from_tag(kind[0])
        .ok_or_else(|| Error::FileFormat(format!("unknown constraint kind {}", kind[0])))?;

    let mut con = Constraint::new(kind, BodyId(0));
    con.id = ConstraintId(id[0]);
    con.state = ConState::empty();

    let mut v3 = [0.0; 3];
    cursor.doubles(&mut v3)?;
    con.r = Vec3::from(v3);
    cursor.doubles(&mut v3)?;
    con.u = Vec3::from(v3);
    if iover > 1 && kind == ConstraintKind::Contact {
        cursor.doubles(&mut v3)?;
        con.v = Vec3::from(v3);
    }
    cursor.doubles(&mut v3)?;
    con.point = Vec3::from(v3);

    let mut base = [0.0; 9];
    cursor.doubles(&mut base)?;
    con.base = Mat3::new(
        base[0], base[1], base[2], base[3], base[4], base[5], base[6], base[7], base[8],
    );

    let mut merit = [0.0];
    cursor.doubles(&mut merit)?;
    con.merit = merit[0];

    let mut master = [0u32];
    cursor.uints(&mut master)?;
    con.master = BodyId(master[0]);
    let mut slave = [0u32];
    cursor.uints(&mut slave)?;
    con.slave = (slave[0] != 0).then_some(BodyId(slave[0]));

    if kind == ConstraintKind::Contact {
        let mut mat = [0.0; 5];
        cursor.doubles(&mut mat)?;
        con.mat.friction = mat[0];
        con.mat.cohesion = mat[1];
        con.mat.restitution = mat[2];
        con.mat.spring = mat[3];
        con.mat.dashpot = mat[4];

        let mut cohesive = [0i32];
        cursor.ints(&mut cohesive)?;
        if cohesive[0] != 0 {
            con.state.insert(ConState::COHESIVE);
        }

        let mut scalar = [0.0];
        cursor.doubles(&mut scalar)?;
        con.area = scalar[0];
        cursor.doubles(&mut scalar)?;
        con.gap = scalar[0];
        cursor.ints(&mut con.spair)?;
    }

    let z_kinds_old = matches!(kind, ConstraintKind::RigidLink | ConstraintKind::VeloDir);
    let z_kinds_new = z_kinds_old || kind == ConstraintKind::Spring;
    if (iover < 4 && z_kinds_old) || (iover >= 4 && z_kinds_new) {
        let mut z = [0.0; Z_SIZE];
        cursor.doubles(&mut z)?;
        con.z = z;
    }

    if parallel {
        // Residence rank during the partitioned run
        let mut rank = [0i32];
        cursor.ints(&mut rank)?;
        con.rank = rank[0];
    }

    Ok(con)
}

/// Pack a complete body record so a reader can rebuild the body.
fn pack_body(body: &Body, frame: &mut FrameWriter) {
    frame.uints(&[body.id.0]);
    frame.ints(&[body.kind.tag(), scheme_tag(body.scheme)]);
    frame.string(body.label.as_deref().unwrap_or(""));
    frame.uints(&[body.flags.bits()]);
    frame.doubles(&[
        body.damping,
        body.material.density,
        body.material.young,
        body.material.poisson,
    ]);
    frame.string(&body.material.label);

    // Primitive headers are fixed four-int records: tag plus three counts
    frame.ints(&[body.shape.primitives.len() as i32]);
    for primitive in &body.shape.primitives {
        match primitive {
            Primitive::Convex(convex) => {
                frame.ints(&[
                    0,
                    convex.ref_vertices.len() as i32,
                    convex.faces.len() as i32,
                    convex.volume,
                ]);
                let flat: Vec<f64> = convex
                    .ref_vertices
                    .iter()
                    .flat_map(|v| [v.x, v.y, v.z])
                    .collect();
                frame.doubles(&flat);
                for face in &convex.faces {
                    frame.ints(&[face.indices.len() as i32, face.surface]);
                    let indices: Vec<i32> = face.indices.iter().map(|&i| i as i32).collect();
                    frame.ints(&indices);
                }
            }
            Primitive::Sphere(sphere) => {
                frame.ints(&[1, sphere.surface, 0, 0]);
                frame.doubles(&[
                    sphere.ref_center.x,
                    sphere.ref_center.y,
                    sphere.ref_center.z,
                    sphere.ref_radius,
                ]);
            }
            Primitive::Ellipsoid(ellip) => {
                frame.ints(&[2, ellip.surface, 0, 0]);
                let mut data = vec![
                    ellip.ref_center.x,
                    ellip.ref_center.y,
                    ellip.ref_center.z,
                    ellip.ref_sca.x,
                    ellip.ref_sca.y,
                    ellip.ref_sca.z,
                ];
                data.extend_from_slice(&ellip.ref_rot.into_row_array());
                frame.doubles(&data);
            }
            Primitive::Mesh(mesh) => {
                frame.ints(&[
                    3,
                    mesh.ref_nodes.len() as i32,
                    mesh.elements.len() as i32,
                    mesh.faces.len() as i32,
                ]);
                let flat: Vec<f64> = mesh
                    .ref_nodes
                    .iter()
                    .flat_map(|v| [v.x, v.y, v.z])
                    .collect();
                frame.doubles(&flat);
                for element in &mesh.elements {
                    frame.ints(&[element.nodes.len() as i32]);
                    let nodes: Vec<i32> = element.nodes.iter().map(|&n| n as i32).collect();
                    frame.ints(&nodes);
                }
                for face in &mesh.faces {
                    frame.ints(&[face.nodes.len() as i32, face.surface, face.element as i32]);
                    let nodes: Vec<i32> = face.nodes.iter().map(|&n| n as i32).collect();
                    frame.ints(&nodes);
                }
            }
        }
    }
}

/// Unpack a complete body record.
fn unpack_body(cursor: &mut FrameCursor) -> Result<Body> {
    let mut id = [0u32];
    cursor.uints(&mut id)?;
    let mut tags = [0i32; 2];
    cursor.ints(&mut tags)?;
    let kind = BodyKind::from_tag(tags[0])
        .ok_or_else(|| Error::FileFormat(format!("unknown body kind {}", tags[0])))?;
    let scheme = scheme_from_tag(tags[1])
        .ok_or_else(|| Error::FileFormat(format!("unknown scheme {}", tags[1])))?;
    let label = cursor.string()?;
    let mut flags = [0u32];
    cursor.uints(&mut flags)?;
    let mut scalars = [0.0; 4];
    cursor.doubles(&mut scalars)?;
    let material_label = cursor.string()?;

    let mut count = [0i32];
    cursor.ints(&mut count)?;

    let mut shape = Shape::default();
    for _ in 0..count[0] {
        let mut head = [0i32; 4];
        cursor.ints(&mut head)?;

        match head[0] {
            0 => {
                let (nv, nf, volume) = (head[1] as usize, head[2] as usize, head[3]);

                let mut flat = vec![0.0; 3 * nv];
                cursor.doubles(&mut flat)?;
                let vertices = flat
                    .chunks_exact(3)
                    .map(|c| Vec3::new(c[0], c[1], c[2]))
                    .collect();

                let mut faces = Vec::with_capacity(nf);
                for _ in 0..nf {
                    let mut face_head = [0i32; 2];
                    cursor.ints(&mut face_head)?;
                    let mut indices = vec![0i32; face_head[0] as usize];
                    cursor.ints(&mut indices)?;

                    faces.push(ConvexFace {
                        indices: indices.iter().map(|&i| i as u32).collect(),
                        surface: face_head[1],
                    });
                }

                shape.push(Primitive::Convex(Convex::new(vertices, faces, volume)));
            }
            1 => {
                let mut data = [0.0; 4];
                cursor.doubles(&mut data)?;

                shape.push(Primitive::Sphere(Sphere::new(
                    Vec3::new(data[0], data[1], data[2]),
                    data[3],
                    head[1],
                )));
            }
            2 => {
                let mut data = [0.0; 15];
                cursor.doubles(&mut data)?;

                let mut ellip = Ellipsoid::new(
                    Vec3::new(data[0], data[1], data[2]),
                    Vec3::new(data[3], data[4], data[5]),
                    head[1],
                );
                let rot = Mat3::new(
                    data[6], data[7], data[8], data[9], data[10], data[11], data[12], data[13],
                    data[14],
                );
                ellip.ref_rot = rot;
                ellip.cur_rot = rot;
                shape.push(Primitive::Ellipsoid(ellip));
            }
            3 => {
                let (nn, ne, nf) = (head[1] as usize, head[2] as usize, head[3] as usize);

                let mut flat = vec![0.0; 3 * nn];
                cursor.doubles(&mut flat)?;
                let nodes: Vec<Vec3<f64>> = flat
                    .chunks_exact(3)
                    .map(|c| Vec3::new(c[0], c[1], c[2]))
                    .collect();

                let mut elements = Vec::with_capacity(ne);
                for _ in 0..ne {
                    let mut n = [0i32];
                    cursor.ints(&mut n)?;
                    let mut ids = vec![0i32; n[0] as usize];
                    cursor.ints(&mut ids)?;

                    let kind = ElementKind::from_nodes(ids.len()).ok_or_else(|| {
                        Error::FileFormat(format!("element with {} nodes", ids.len()))
                    })?;
                    elements.push(Element {
                        kind,
                        nodes: ids.iter().map(|&i| i as u32).collect(),
                    });
                }

                let mut faces = Vec::with_capacity(nf);
                for _ in 0..nf {
                    let mut face_head = [0i32; 3];
                    cursor.ints(&mut face_head)?;
                    let mut ids = vec![0i32; face_head[0] as usize];
                    cursor.ints(&mut ids)?;

                    faces.push(MeshFace {
                        nodes: ids.iter().map(|&i| i as u32).collect(),
                        surface: face_head[1],
                        element: face_head[2] as u32,
                    });
                }

                let cur_nodes = nodes.clone();
                shape.push(Primitive::Mesh(Mesh {
                    ref_nodes: nodes,
                    cur_nodes,
                    elements,
                    faces,
                    volume: 0,
                }));
            }
            _ => {
                return Err(Error::FileFormat(format!(
                    "unknown primitive tag {}",
                    head[0]
                )))
            }
        }
    }

    let material = BulkMaterial {
        label: material_label,
        density: scalars[1],
        young: scalars[2],
        poisson: scalars[3],
    };

    let mut body = Body::new(kind, shape, material);
    body.id = BodyId(id[0]);
    body.scheme = scheme;
    body.damping = scalars[0];
    body.flags = BodyFlags::from_bits_truncate(flags[0]);
    if !label.is_empty() {
        body.label = Some(label);
    }

    Ok(body)
}

/// Integration scheme tag.
fn scheme_tag(scheme: Scheme) -> i32 {
    match scheme {
        Scheme::RigPos => 0,
        Scheme::RigNeg => 1,
        Scheme::RigImp => 2,
        Scheme::DefExp => 3,
        Scheme::DefLim => 4,
    }
}

/// Scheme from its tag.
fn scheme_from_tag(tag: i32) -> Option<Scheme> {
    match tag {
        0 => Some(Scheme::RigPos),
        1 => Some(Scheme::RigNeg),
        2 => Some(Scheme::RigImp),
        3 => Some(Scheme::DefExp),
        4 => Some(Scheme::DefLim),
        _ => None,
    }
}

/// Read the IO version of a frame, defaulting to two for old files.
fn frame_iover(cursor: &mut FrameCursor) -> Result<u32> {
    if cursor.label("IOVER") {
        let mut iover = [0i32];
        cursor.ints(&mut iover)?;
        Ok(iover[0] as u32)
    } else {
        Ok(2)
    }
}

/// Initialise the domain state from the frame nearest a time: bodies found
/// by id get their configuration, velocity and energy overwritten, absent
/// records are mock read. Label regexes narrow the update to matching
/// bodies.
pub fn init_state(
    dom: &mut Domain,
    reader: &FrameReader,
    time: f64,
    patterns: Option<&[String]>,
) -> Result<()> {
    let mut cursor = reader
        .seek(time)
        .ok_or_else(|| Error::NoSuchFrame("DOM".to_string()))?;

    if !cursor.label("DOM") {
        return Err(Error::NoSuchFrame("DOM".to_string()));
    }
    let iover = frame_iover(&mut cursor)?;
    if iover < 3 {
        return Err(Error::IoVersion(iover, 3));
    }

    if let Some(patterns) = patterns {
        let regexes: Vec<Regex> = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<_, _>>()?;

        let labeled: Vec<(String, BodyId)> = dom
            .labels
            .iter()
            .map(|(label, id)| (label.clone(), *id))
            .collect();

        for (label, id) in labeled {
            if !regexes.iter().any(|r| r.is_match(&label)) {
                continue;
            }
            let mut cursor = reader.seek(time).expect("frame vanished");
            if !cursor.label(&label) {
                continue;
            }
            // The label record precedes the state
            let _ = cursor.string()?;
            let body = dom.bodies.get_mut(&id).expect("labeled body vanished");
            read_body_state(body, &mut cursor)?;
        }

        return Ok(());
    }

    if !cursor.label("BODS") {
        return Err(Error::NoSuchFrame("BODS".to_string()));
    }
    let mut nbod = [0i32];
    cursor.ints(&mut nbod)?;

    for _ in 0..nbod[0] {
        let mut id = [0u32];
        cursor.uints(&mut id)?;
        let _label = cursor.string()?;

        match dom.bodies.get_mut(&BodyId(id[0])) {
            Some(body) => read_body_state(body, &mut cursor)?,
            None => mock_read_body_state(&mut cursor, reader.parallel)?,
        }
    }

    Ok(())
}

/// Replay a full frame into the domain: body states, reconstructed missing
/// bodies, and the stored constraint set.
pub fn read_state(dom: &mut Domain, reader: &FrameReader, time: f64) -> Result<()> {
    let mut cursor = reader
        .seek(time)
        .ok_or_else(|| Error::NoSuchFrame("DOM".to_string()))?;

    if !cursor.label("DOM") {
        return Err(Error::NoSuchFrame("DOM".to_string()));
    }
    let iover = frame_iover(&mut cursor)?;

    if cursor.label("STEP") {
        let mut step = [0.0];
        cursor.doubles(&mut step)?;
        dom.step = step[0];
    }
    if cursor.label("MERIT") {
        let mut merit = [0.0];
        cursor.doubles(&mut merit)?;
        dom.merit = merit[0];
    }

    dom.clear_constraints();

    // Reconstruct stored bodies from the new-body blocks of every frame
    for index in 0..reader.len() {
        let mut newbod = reader.frame(index).expect("frame vanished");
        if !newbod.label("NEWBOD") {
            continue;
        }

        let mut count = [0i32];
        newbod.ints(&mut count)?;
        for _ in 0..count[0] {
            let body = unpack_body(&mut newbod)?;
            if !dom.bodies.contains_key(&body.id) {
                dom.insert_body_with_id(body)?;
            }
        }
    }

    // Mark everything absent, then tick off what the frame carries
    for body in dom.bodies.values_mut() {
        body.flags.insert(BodyFlags::ABSENT);
    }

    if !cursor.label("BODS") {
        return Err(Error::NoSuchFrame("BODS".to_string()));
    }
    let mut nbod = [0i32];
    cursor.ints(&mut nbod)?;
    for _ in 0..nbod[0] {
        let mut id = [0u32];
        cursor.uints(&mut id)?;
        let _label = cursor.string()?;

        match dom.bodies.get_mut(&BodyId(id[0])) {
            Some(body) => {
                read_body_state(body, &mut cursor)?;
                body.flags.remove(BodyFlags::ABSENT);
            }
            None => {
                mock_read_body_state(&mut cursor, reader.parallel)?;
                warn!("body {} has no live counterpart; skipped", id[0]);
            }
        }
    }

    // Absent bodies left the simulation before this frame
    let absent: Vec<BodyId> = dom
        .bodies
        .values()
        .filter(|b| b.flags.contains(BodyFlags::ABSENT))
        .map(|b| b.id)
        .collect();
    for id in absent {
        dom.remove_body(id);
    }

    if !cursor.label("CONS") {
        return Err(Error::NoSuchFrame("CONS".to_string()));
    }
    let mut ncon = [0i32];
    cursor.ints(&mut ncon)?;
    for _ in 0..ncon[0] {
        let con = read_constraint(&mut cursor, iover, reader.parallel)?;
        dom.attach_read_constraint(con);
    }

    // Shapes follow the restored configurations
    let ids = dom.sorted_body_ids();
    for id in ids {
        dom.bodies.get_mut(&id).expect("body vanished").update_shape();
    }

    dom.time = cursor.time();

    Ok(())
}

/// Read stored timers into the registry, keeping rank maxima.
pub fn read_timers(reader: &FrameReader, time: f64, timers: &mut Timers) -> Result<()> {
    let mut cursor = reader
        .seek(time)
        .ok_or_else(|| Error::NoSuchFrame("TIMERS".to_string()))?;

    if !cursor.label("TIMERS") {
        return Err(Error::NoSuchFrame("TIMERS".to_string()));
    }

    timers.clear();
    let mut count = [0i32];
    cursor.ints(&mut count)?;
    for _ in 0..count[0] {
        let label = cursor.string()?;
        let mut total = [0.0];
        cursor.doubles(&mut total)?;
        timers.merge(&label, total[0]);
    }

    Ok(())
}

/// Map rigid records onto finite element bodies at state initialisation;
/// other kinds read their state directly.
pub fn rigid_to_fem(
    dom: &mut Domain,
    reader: &FrameReader,
    time: f64,
    patterns: Option<&[String]>,
) -> Result<()> {
    let mut cursor = reader
        .seek(time)
        .ok_or_else(|| Error::NoSuchFrame("DOM".to_string()))?;

    if !cursor.label("DOM") {
        return Err(Error::NoSuchFrame("DOM".to_string()));
    }
    let iover = frame_iover(&mut cursor)?;
    if iover < 3 {
        return Err(Error::IoVersion(iover, 3));
    }

    let matches_pattern = |label: Option<&String>| -> Result<bool> {
        match patterns {
            None => Ok(true),
            Some(patterns) => {
                let label = match label {
                    Some(label) => label,
                    None => return Ok(false),
                };
                for p in patterns {
                    if Regex::new(p)?.is_match(label) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    };

    if !cursor.label("BODS") {
        return Err(Error::NoSuchFrame("BODS".to_string()));
    }
    let mut nbod = [0i32];
    cursor.ints(&mut nbod)?;

    for _ in 0..nbod[0] {
        let mut id = [0u32];
        cursor.uints(&mut id)?;
        let _label = cursor.string()?;

        let body_id = BodyId(id[0]);
        let eligible = dom
            .bodies
            .get(&body_id)
            .map(|b| matches_pattern(b.label.as_ref()))
            .transpose()?
            .unwrap_or(false);

        if !eligible {
            mock_read_body_state(&mut cursor, reader.parallel)?;
            continue;
        }

        let mut header = [0i32; 3];
        cursor.ints(&mut header)?;
        let stored_kind = header[0];

        let body = dom.bodies.get_mut(&body_id).expect("body vanished");
        if body.kind == BodyKind::FiniteElement && stored_kind == BodyKind::Rigid.tag() {
            // A 12-double rigid configuration mapped onto the nodal basis
            let mut conf = [0.0; 12];
            let mut velo = [0.0; 6];
            let mut en = [0.0; 4];
            cursor.doubles(&mut conf)?;
            cursor.doubles(&mut velo)?;
            cursor.doubles(&mut en)?;
            if reader.parallel {
                let mut rank = [0i32];
                cursor.ints(&mut rank)?;
            }

            let rotation = Mat3::new(
                conf[0], conf[1], conf[2], conf[3], conf[4], conf[5], conf[6], conf[7], conf[8],
            );
            let position = Vec3::new(conf[9], conf[10], conf[11]);
            let angular = Vec3::new(velo[0], velo[1], velo[2]);
            let linear = Vec3::new(velo[3], velo[4], velo[5]);
            body.from_rigid(&rotation, position, angular, linear);
            body.energy[..4].copy_from_slice(&en);
            body.energy[energy::INTERNAL] = 0.0;
        } else {
            if stored_kind != body.kind.tag() {
                return Err(Error::StateMismatch {
                    id: body_id,
                    what: "kind",
                    stored: stored_kind as usize,
                    expected: body.kind.tag() as usize,
                });
            }
            if header[1] as usize != body.conf_size() {
                return Err(Error::StateMismatch {
                    id: body_id,
                    what: "configuration size",
                    stored: header[1] as usize,
                    expected: body.conf_size(),
                });
            }
            if header[2] as usize != body.dofs() {
                return Err(Error::StateMismatch {
                    id: body_id,
                    what: "dof count",
                    stored: header[2] as usize,
                    expected: body.dofs(),
                });
            }

            cursor.doubles(&mut body.conf)?;
            cursor.doubles(&mut body.velo)?;
            let size = body.energy_size();
            cursor.doubles(&mut body.energy[..size])?;
            body.prev_velo.copy_from_slice(&body.velo);
            if reader.parallel {
                let mut rank = [0i32];
                cursor.ints(&mut rank)?;
            }
        }
    }

    Ok(())
}

