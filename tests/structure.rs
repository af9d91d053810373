//! File discovery, group machinery, typed values and inspection.

mod common;

use common::*;
use purehdf::{
    Error, Hdf5File, Node, NodeDescription, NodeKind, TimeUnit, Value,
};

fn int32() -> Vec<u8> {
    datatype_fixed(4, true)
}

fn tree_file() -> Vec<u8> {
    let mut b = FileBuilder::new();
    let data1d = write_dataset(
        &mut b,
        &[5],
        &datatype_f64(),
        &f64_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0]),
    );
    let inner_data = write_dataset(&mut b, &[2], &int32(), &i32_bytes(&[11, 22]));
    let inner = write_group(&mut b, &[("data", inner_data)]);
    let outer = write_group(&mut b, &[("inner", inner)]);
    let root = write_group(&mut b, &[("data1d", data1d), ("outer", outer)]);
    b.finish(root)
}

#[test]
fn matlab_wrapped_file_opens_at_512() {
    let image = tree_file();
    let wrapped = matlab_wrap(&image);
    let file = Hdf5File::from_buffer(wrapped).unwrap();
    let values: Vec<f64> = file
        .dataset("/data1d")
        .unwrap()
        .read()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn missing_signature_is_rejected() {
    assert!(matches!(
        Hdf5File::from_buffer(vec![0u8; 4096]),
        Err(Error::BadSignature)
    ));
    // A signature at a non-candidate offset does not count.
    let mut stray = vec![0u8; 4096];
    stray[100..108].copy_from_slice(SIGNATURE);
    assert!(matches!(
        Hdf5File::from_buffer(stray),
        Err(Error::BadSignature)
    ));
}

#[test]
fn nested_paths_resolve() {
    let file = Hdf5File::from_buffer(tree_file()).unwrap();
    let dataset = file.dataset("/outer/inner/data").unwrap();
    assert_eq!(dataset.shape(), &[2]);
    let values: Vec<i64> = dataset
        .read()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![11, 22]);

    match file.resolve("/outer/inner").unwrap() {
        Node::Group(group) => assert_eq!(group.path(), "/outer/inner"),
        Node::Dataset(_) => panic!("expected a group"),
    }
}

#[test]
fn missing_paths_fail_with_path_not_found() {
    let file = Hdf5File::from_buffer(tree_file()).unwrap();
    assert!(matches!(
        file.resolve("/nope"),
        Err(Error::PathNotFound(_))
    ));
    match file.resolve("/outer/missing/data") {
        Err(Error::PathNotFound(path)) => assert_eq!(path, "/outer/missing"),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn children_report_kinds() {
    let file = Hdf5File::from_buffer(tree_file()).unwrap();
    let root = file.root().unwrap();
    let children = root.children().unwrap();
    assert_eq!(
        children,
        vec![
            ("data1d".to_string(), NodeKind::Dataset),
            ("outer".to_string(), NodeKind::Group),
        ]
    );
    match root.child("outer").unwrap() {
        Node::Group(group) => {
            assert_eq!(
                group.children().unwrap(),
                vec![("inner".to_string(), NodeKind::Group)]
            );
        }
        Node::Dataset(_) => panic!("expected a group"),
    }
}

#[test]
fn empty_groups_have_no_children() {
    let mut b = FileBuilder::new();
    let empty = write_group(&mut b, &[]);
    let root = write_group(&mut b, &[("empty", empty)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let children = file.group("/empty").unwrap().children().unwrap();
    assert!(children.is_empty());
}

#[test]
fn version2_superblock_and_link_message_groups() {
    let mut b = FileBuilder::new_v2();
    let data = write_dataset(&mut b, &[3], &int32(), &i32_bytes(&[5, 6, 7]));
    let sub = write_group_v2(&mut b, &[("data", data)]);
    let root = write_group_v2(&mut b, &[("sub", sub)]);
    let file = Hdf5File::from_buffer(b.finish_v2(root)).unwrap();
    assert_eq!(file.superblock_version(), 2);
    let values: Vec<i64> = file
        .dataset("/sub/data")
        .unwrap()
        .read()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![5, 6, 7]);
}

#[test]
fn both_group_encodings_resolve_the_same_tree() {
    // The same dataset reachable through an old-style and a new-style
    // group must read identically.
    let mut b = FileBuilder::new();
    let data = write_dataset(&mut b, &[2], &int32(), &i32_bytes(&[1, 2]));
    let old_style = write_group(&mut b, &[("data", data)]);
    let new_style = write_group_v2(&mut b, &[("data", data)]);
    let root = write_group(&mut b, &[("old", old_style), ("new", new_style)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    assert_eq!(
        file.dataset("/old/data").unwrap().read().unwrap(),
        file.dataset("/new/data").unwrap().read().unwrap()
    );
}

#[test]
fn soft_links_are_reported_but_not_followed() {
    let mut b = FileBuilder::new();
    let data = write_dataset(&mut b, &[2], &int32(), &i32_bytes(&[1, 2]));
    let group = b.append(&object_header_v2(&[
        (0x06, link_message_hard("data", data)),
        (0x06, link_message_soft("alias", "/data")),
    ]));
    let root = write_group(&mut b, &[("g", group)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let children = file.group("/g").unwrap().children().unwrap();
    assert!(children.contains(&("alias".to_string(), NodeKind::SoftLink)));
    assert!(matches!(
        file.resolve("/g/alias"),
        Err(Error::UnsupportedFeature(_))
    ));
}

#[test]
fn unknown_messages_do_not_break_later_ones() {
    let mut b = FileBuilder::new();
    let data = i32_bytes(&[3, 1, 4]);
    let data_address = b.append(&data);
    let header = object_header_v1(&[
        message(0x0017, &[0xAB; 16]), // not a type this reader knows
        message(0x0001, &dataspace_v1(&[3])),
        message(0x0003, &int32()),
        message(0x0008, &layout_contiguous(data_address, data.len() as u64)),
    ]);
    let dataset = b.append(&header);
    let root = write_group(&mut b, &[("data", dataset)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let values: Vec<i64> = file
        .dataset("/data")
        .unwrap()
        .read()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![3, 1, 4]);
}

#[test]
fn boolean_datasets() {
    let mut b = FileBuilder::new();
    let flags = write_dataset(
        &mut b,
        &[5],
        &datatype_boolean(),
        &[0x01, 0x00, 0x01, 0x01, 0x00],
    );
    let root = write_group(&mut b, &[("flags", flags)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let dataset = file.dataset("/flags").unwrap();
    assert!(dataset.datatype().is_boolean());
    assert_eq!(
        dataset.read_as_boolean().unwrap(),
        vec![true, false, true, true, false]
    );
    // A plain read yields typed booleans too.
    assert_eq!(dataset.read().unwrap()[0], Value::Boolean(true));
}

#[test]
fn enum_values_map_to_names() {
    let mut b = FileBuilder::new();
    let states = write_dataset(
        &mut b,
        &[4],
        &datatype_enum_int32(&[("OFF", 0), ("ON", 1)]),
        &i32_bytes(&[0, 1, 1, 5]),
    );
    let root = write_group(&mut b, &[("states", states)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let values = file.dataset("/states").unwrap().read().unwrap();
    assert_eq!(
        values[0],
        Value::Enum {
            name: Some("OFF".to_string()),
            value: 0
        }
    );
    assert_eq!(
        values[1],
        Value::Enum {
            name: Some("ON".to_string()),
            value: 1
        }
    );
    // Values outside the member list stay numeric.
    assert_eq!(values[3], Value::Enum { name: None, value: 5 });
}

#[test]
fn compound_fields_decode_at_their_offsets() {
    let mut raw = Vec::new();
    for (x, y) in &[(1i32, 0.5f64), (2, 1.5), (3, 2.5)] {
        raw.extend_from_slice(&x.to_le_bytes());
        raw.extend_from_slice(&[0; 4]); // alignment hole
        raw.extend_from_slice(&y.to_le_bytes());
    }
    let mut b = FileBuilder::new();
    let points = write_dataset(&mut b, &[3], &datatype_compound_x_y(), &raw);
    let root = write_group(&mut b, &[("points", points)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let values = file.dataset("/points").unwrap().read().unwrap();
    assert_eq!(
        values[1],
        Value::Compound(vec![
            ("x".to_string(), Value::Int(2)),
            ("y".to_string(), Value::Float(1.5)),
        ])
    );
}

#[test]
fn time_datasets_convert_to_datetimes() {
    let seconds = [1_600_000_000i64, 1_600_000_060];
    let mut b = FileBuilder::new();
    let times = write_dataset(&mut b, &[2], &datatype_time64(), &i64_bytes(&seconds));
    let root = write_group(&mut b, &[("times", times)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let dataset = file.dataset("/times").unwrap();
    assert_eq!(dataset.read().unwrap()[0], Value::Time(1_600_000_000));

    let auto = dataset.read_as_datetime(None).unwrap();
    assert_eq!(auto[0].timestamp(), 1_600_000_000);
    assert_eq!(auto[1].timestamp(), 1_600_000_060);

    // Forcing milliseconds reinterprets the same magnitudes.
    let forced = dataset
        .read_as_datetime(Some(TimeUnit::Milliseconds))
        .unwrap();
    assert_eq!(forced[0].timestamp(), 1_600_000);
}

#[test]
fn inspect_describes_the_tree() {
    let now = 1_700_000_000u32;
    let mut b = FileBuilder::new();
    let data = write_dataset_with(
        &mut b,
        &[4],
        &datatype_f64(),
        &f64_bytes(&[0.0; 4]),
        &[message(0x0012, &modification_time(now))],
    );
    let inner = write_group(&mut b, &[("data", data)]);
    let root = write_group(&mut b, &[("group", inner)]);
    let file = Hdf5File::from_buffer(b.finish(root)).unwrap();
    let description = file.inspect().unwrap();
    assert_eq!(description.superblock_version, 0);
    assert_eq!(description.root_children.len(), 1);
    match &description.root_children[0] {
        NodeDescription::Group { name, children, .. } => {
            assert_eq!(name, "group");
            match &children[0] {
                NodeDescription::Dataset {
                    name,
                    shape,
                    dtype,
                    modified,
                } => {
                    assert_eq!(name, "data");
                    assert_eq!(shape, &[4]);
                    assert_eq!(dtype, "Float64");
                    assert_eq!(*modified, Some(now));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn list_datasets_flattens_the_tree() {
    let file = Hdf5File::from_buffer(tree_file()).unwrap();
    assert_eq!(
        file.list_datasets().unwrap(),
        vec!["/data1d".to_string(), "/outer/inner/data".to_string()]
    );
}

#[test]
fn wrong_kind_errors() {
    let file = Hdf5File::from_buffer(tree_file()).unwrap();
    assert!(matches!(
        file.dataset("/outer"),
        Err(Error::NotADataset(_))
    ));
    assert!(matches!(file.group("/data1d"), Err(Error::NotAGroup(_))));
}
