//! Label registry, id packing, canonical label nodes, pending links

mod common;

use common::{new_builder, new_code};

use mortar::code::SectionId;
use mortar::emitter::{Emitter, Label};
use mortar::error::Error;

#[test]
fn label_ids_pack_dense_indices() {
    let code = new_code();
    let first = code.new_label_id().unwrap();
    let second = code.new_label_id().unwrap();

    assert!(first.is_valid());
    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert_ne!(first.id(), second.id());
    assert_eq!(code.labels_count(), 2);
}

#[test]
fn invalid_label_queries() {
    let code = new_code();
    assert!(!code.is_label_valid(Label::INVALID));
    assert!(!code.is_label_bound(Label::INVALID));
    assert_eq!(code.label_offset(Label::INVALID), None);

    let label = code.new_label_id().unwrap();
    assert!(code.is_label_valid(label));
    assert!(!code.is_label_bound(label));
    assert_eq!(code.label_offset(label), None);
}

#[test]
fn binding_is_one_way() {
    let code = new_code();
    let label = code.new_label_id().unwrap();

    code.append_to_section(SectionId::DEFAULT, &[0x90; 8]).unwrap();
    code.bind_label(label, SectionId::DEFAULT, 4).unwrap();

    assert!(code.is_label_bound(label));
    assert_eq!(code.label_offset(label), Some(4));

    // Rebinding must fail and leave the offset untouched.
    let err = code.bind_label(label, SectionId::DEFAULT, 8);
    assert_eq!(err, Err(Error::InvalidState));
    assert_eq!(code.label_offset(label), Some(4));
}

#[test]
fn binding_past_section_length_is_rejected() {
    let code = new_code();
    let label = code.new_label_id().unwrap();
    let err = code.bind_label(label, SectionId::DEFAULT, 1);
    assert_eq!(err, Err(Error::InvalidArgument));
    assert!(!code.is_label_bound(label));
}

#[test]
fn builder_labels_are_canonical() {
    let (code, mut cb) = new_builder();
    let label = cb.new_label();
    assert!(code.is_label_valid(label));

    let node_a = cb.label_node(label).unwrap();
    let node_b = cb.label_node(label).unwrap();
    assert_eq!(node_a, node_b);
    assert_eq!(cb.label_node_id(label), Some(node_a));
}

#[test]
fn bind_appends_the_canonical_node() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();

    cb.bind(label).unwrap();
    let bound = cb.first_node().unwrap();
    assert_eq!(cb.label_node_id(label), Some(bound));

    let data = cb.node(bound).unwrap().label_data().unwrap();
    assert_eq!(data.label, label);
}

#[test]
fn bind_of_unknown_label_fails() {
    let (_code, mut cb) = new_builder();
    assert_eq!(cb.bind(Label::INVALID), Err(Error::InvalidLabel));
    assert_eq!(cb.last_error(), Some(Error::InvalidLabel));
}

#[test]
fn labels_created_on_holder_resolve_in_builder() {
    let (code, mut cb) = new_builder();
    let label = code.new_label_id().unwrap();

    // First use materializes the canonical node.
    cb.bind(label).unwrap();
    assert_eq!(cb.list_len(), 1);
    assert!(cb.label_node_id(label).is_some());
}

#[test]
fn label_links_stack_and_recycle() {
    let code = new_code();
    let label = code.new_label_id().unwrap();

    let first = code.push_label_link(label, 8, 0, None).unwrap();
    let second = code.push_label_link(label, 16, -4, Some(7)).unwrap();
    assert_ne!(first, second);

    let links = code.take_label_links(label);
    assert_eq!(links.len(), 2);
    // Newest first.
    assert_eq!(links[0].offset, 16);
    assert_eq!(links[0].displacement, -4);
    assert_eq!(links[0].reloc_id, Some(7));
    assert_eq!(links[1].offset, 8);

    // Taken links go back to the free list and get reused.
    let recycled = code.new_label_link();
    assert!(recycled == first || recycled == second);

    assert!(code.take_label_links(label).is_empty());
}
