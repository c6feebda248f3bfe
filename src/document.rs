use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::emitter::AnchorInfo;
use crate::macros::is_printable;
use crate::resolver::{Resolver, MERGE_TAG};
use crate::{
    AliasData, CommentKind, ComposerError, Emitter, EmitterError, Event, EventData, NonPrintableStyle,
    MappingStyle, Mark, Parser, ScalarStyle, SequenceStyle, TagDirective, VersionDirective,
    BINARY_TAG, DEFAULT_MAPPING_TAG, DEFAULT_SCALAR_TAG, DEFAULT_SEQUENCE_TAG, MAP_TAG, SEQ_TAG,
    STR_TAG,
};
use crate::encode_binary;

/// Configuration accepted by [`Document::load_with_options()`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct LoaderOptions {
    /// Let the last occurrence of a duplicate mapping key win instead of
    /// raising an error. Defaults to `true`, matching the lenient behavior
    /// of most YAML 1.1 implementations.
    pub allow_duplicate_keys: bool,
    /// Maximum number of aliases that may reference a single non-scalar
    /// (sequence or mapping) node. Guards against the "billion laughs"
    /// amplification attack.
    pub max_aliases_for_collections: i32,
    /// Maximum collection nesting depth accepted while composing.
    pub nesting_depth_limit: i32,
    /// Rules used to assign implicit tags to untagged scalars, sequences,
    /// and mappings.
    pub resolver: Resolver,
    /// Collect comments onto the nodes they are attached to instead of
    /// discarding them. Defaults to `false`, matching the teacher's
    /// original scanner, which drops comments outright.
    pub process_comments: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            allow_duplicate_keys: true,
            max_aliases_for_collections: 50,
            nesting_depth_limit: 50,
            resolver: Resolver::new(),
            process_comments: false,
        }
    }
}

/// The document structure.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Document {
    /// The document nodes.
    pub nodes: Vec<Node>,
    /// The version directive.
    pub version_directive: Option<VersionDirective>,
    /// The list of tag directives.
    ///
    /// ```
    /// # const _: &str = stringify! {
    /// struct {
    ///     /// The beginning of the tag directives list.
    ///     start: *mut yaml_tag_directive_t,
    ///     /// The end of the tag directives list.
    ///     end: *mut yaml_tag_directive_t,
    /// }
    /// # };
    /// ```
    pub tag_directives: Vec<TagDirective>,
    /// Is the document start indicator implicit?
    pub start_implicit: bool,
    /// Is the document end indicator implicit?
    pub end_implicit: bool,
    /// The beginning of the document.
    pub start_mark: Mark,
    /// The end of the document.
    pub end_mark: Mark,
    /// Rules used to assign implicit tags to untagged scalars, sequences,
    /// and mappings.
    resolver: Resolver,
    /// Let the last occurrence of a duplicate mapping key win instead of
    /// raising [`ComposerError::DuplicateKey`].
    allow_duplicate_keys: bool,
    /// Maximum number of aliases that may reference a single non-scalar
    /// node.
    max_aliases_for_collections: i32,
    /// Maximum collection nesting depth accepted while composing.
    nesting_depth_limit: i32,
    /// Reference counts of aliases pointing at non-scalar nodes, indexed by
    /// node id. Reset at the start of every load.
    alias_counts: BTreeMap<i32, i32>,
    /// Collect comments onto the nodes they are attached to.
    process_comments: bool,
    /// Block/blank-line comments seen since the last node was added, still
    /// waiting for the node they precede.
    pending_block_comments: Vec<String>,
    /// Id of the most recently added node, used to attach trailing
    /// in-line comments.
    last_added_node: i32,
}

/// The node structure.
#[derive(Clone, Default, Debug)]
#[non_exhaustive]
pub struct Node {
    /// The node type.
    pub data: NodeData,
    /// The node tag.
    pub tag: Option<String>,
    /// The beginning of the node.
    pub start_mark: Mark,
    /// The end of the node.
    pub end_mark: Mark,
    /// Comments that occupied their own line(s) immediately before this
    /// node, in source order. Populated only when comment collection is
    /// enabled. A blank line is represented as an empty string.
    pub block_comments: Vec<String>,
    /// Comments that trailed this node on the same line.
    pub in_line_comments: Vec<String>,
    /// Comments collected just before this node's closing indicator (only
    /// meaningful for sequences and mappings).
    pub end_comments: Vec<String>,
}

/// Node types.
#[derive(Clone, Default, Debug)]
pub enum NodeData {
    /// An empty node.
    #[default]
    NoNode,
    /// A scalar node.
    Scalar {
        /// The scalar value.
        value: String,
        /// The scalar style.
        style: ScalarStyle,
    },
    /// A sequence node.
    Sequence {
        /// The stack of sequence items.
        items: Vec<NodeItem>,
        /// The sequence style.
        style: SequenceStyle,
    },
    /// A mapping node.
    Mapping {
        /// The stack of mapping pairs (key, value).
        pairs: Vec<NodePair>,
        /// The mapping style.
        style: MappingStyle,
        /// Set once `<<` merge keys have been expanded into `pairs`.
        merged: bool,
    },
}

/// An element of a sequence node.
pub type NodeItem = i32;

/// An element of a mapping node.
#[derive(Copy, Clone, Default, Debug)]
#[non_exhaustive]
pub struct NodePair {
    /// The key of the element.
    pub key: i32,
    /// The value of the element.
    pub value: i32,
}

impl Document {
    /// Create a YAML document.
    pub fn new(
        version_directive: Option<VersionDirective>,
        tag_directives_in: &[TagDirective],
        start_implicit: bool,
        end_implicit: bool,
    ) -> Document {
        let nodes = Vec::with_capacity(16);
        let tag_directives = tag_directives_in.to_vec();

        Document {
            nodes,
            version_directive,
            tag_directives,
            start_implicit,
            end_implicit,
            start_mark: Mark::default(),
            end_mark: Mark::default(),
            resolver: Resolver::new(),
            allow_duplicate_keys: true,
            max_aliases_for_collections: 50,
            nesting_depth_limit: 50,
            alias_counts: BTreeMap::new(),
            process_comments: false,
            pending_block_comments: Vec::new(),
            last_added_node: 0,
        }
    }

    /// Get a node of a YAML document.
    ///
    /// Returns the node object or `None` if `index` is out of range.
    pub fn get_node_mut(&mut self, index: i32) -> Option<&mut Node> {
        self.nodes.get_mut(index as usize - 1)
    }

    /// Get a node of a YAML document.
    ///
    /// Returns the node object or `None` if `index` is out of range.
    pub fn get_node(&self, index: i32) -> Option<&Node> {
        self.nodes.get(index as usize - 1)
    }

    /// Get the root of a YAML document node.
    ///
    /// The root object is the first object added to the document.
    ///
    /// An empty document produced by the parser signifies the end of a YAML stream.
    ///
    /// Returns the node object or `None` if the document is empty.
    pub fn get_root_node(&mut self) -> Option<&mut Node> {
        self.nodes.get_mut(0)
    }

    /// Create a SCALAR node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    ///
    /// Returns the node id or 0 on error.
    #[must_use]
    pub fn add_scalar(&mut self, tag: Option<&str>, value: &str, style: ScalarStyle) -> i32 {
        let mark = Mark {
            index: 0_u64,
            line: 0_u64,
            column: 0_u64,
        };
        let tag = tag.unwrap_or(DEFAULT_SCALAR_TAG);
        let tag_copy = String::from(tag);
        let value_copy = String::from(value);
        let node = Node {
            data: NodeData::Scalar {
                value: value_copy,
                style,
            },
            tag: Some(tag_copy),
            start_mark: mark,
            end_mark: mark,
            ..Default::default()
        };
        self.nodes.push(node);
        self.nodes.len() as i32
    }

    /// Create a SEQUENCE node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    ///
    /// Returns the node id, which is a nonzero integer.
    #[must_use]
    pub fn add_sequence(&mut self, tag: Option<&str>, style: SequenceStyle) -> i32 {
        let mark = Mark {
            index: 0_u64,
            line: 0_u64,
            column: 0_u64,
        };

        let items = Vec::with_capacity(16);
        let tag = tag.unwrap_or(DEFAULT_SEQUENCE_TAG);
        let tag_copy = String::from(tag);
        let node = Node {
            data: NodeData::Sequence { items, style },
            tag: Some(tag_copy),
            start_mark: mark,
            end_mark: mark,
            ..Default::default()
        };
        self.nodes.push(node);
        self.nodes.len() as i32
    }

    /// Create a MAPPING node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    ///
    /// Returns the node id, which is a nonzero integer.
    #[must_use]
    pub fn add_mapping(&mut self, tag: Option<&str>, style: MappingStyle) -> i32 {
        let mark = Mark {
            index: 0_u64,
            line: 0_u64,
            column: 0_u64,
        };
        let pairs = Vec::with_capacity(16);
        let tag = tag.unwrap_or(DEFAULT_MAPPING_TAG);
        let tag_copy = String::from(tag);

        let node = Node {
            data: NodeData::Mapping {
                pairs,
                style,
                merged: false,
            },
            tag: Some(tag_copy),
            start_mark: mark,
            end_mark: mark,
            ..Default::default()
        };

        self.nodes.push(node);
        self.nodes.len() as i32
    }

    /// Add an item to a SEQUENCE node.
    pub fn append_sequence_item(&mut self, sequence: i32, item: i32) {
        assert!(sequence > 0 && sequence as usize - 1 < self.nodes.len());
        assert!(matches!(
            &self.nodes[sequence as usize - 1].data,
            NodeData::Sequence { .. }
        ));
        assert!(item > 0 && item as usize - 1 < self.nodes.len());
        if let NodeData::Sequence { ref mut items, .. } =
            &mut self.nodes[sequence as usize - 1].data
        {
            items.push(item);
        }
    }

    /// Add a pair of a key and a value to a MAPPING node.
    pub fn yaml_document_append_mapping_pair(&mut self, mapping: i32, key: i32, value: i32) {
        assert!(mapping > 0 && mapping as usize - 1 < self.nodes.len());
        assert!(matches!(
            &self.nodes[mapping as usize - 1].data,
            NodeData::Mapping { .. }
        ));
        assert!(key > 0 && key as usize - 1 < self.nodes.len());
        assert!(value > 0 && value as usize - 1 < self.nodes.len());
        let pair = NodePair { key, value };
        if let NodeData::Mapping { ref mut pairs, .. } = &mut self.nodes[mapping as usize - 1].data
        {
            pairs.push(pair);
        }
    }

    /// Parse the input stream and produce the next YAML document.
    ///
    /// Call this function subsequently to produce a sequence of documents
    /// constituting the input stream.
    ///
    /// If the produced document has no root node, it means that the document end
    /// has been reached.
    ///
    /// An application must not alternate the calls of
    /// [`yaml_parser_load()`](crate::yaml_parser_load) with the calls of
    /// [`yaml_parser_scan()`](crate::yaml_parser_scan) or
    /// [`yaml_parser_parse()`](crate::yaml_parser_parse). Doing this will break the
    /// parser.
    pub fn load(parser: &mut Parser) -> Result<Document, ComposerError> {
        Self::load_with_options(parser, LoaderOptions::default())
    }

    /// Parse the input stream and produce the next YAML document, using a
    /// non-default [`LoaderOptions`].
    ///
    /// See [`Document::load()`] for the general contract.
    pub fn load_with_options(
        parser: &mut Parser,
        options: LoaderOptions,
    ) -> Result<Document, ComposerError> {
        let mut document = Document::new(None, &[], false, false);
        document.allow_duplicate_keys = options.allow_duplicate_keys;
        document.max_aliases_for_collections = options.max_aliases_for_collections;
        document.nesting_depth_limit = options.nesting_depth_limit;
        document.resolver = options.resolver;
        document.process_comments = options.process_comments;
        parser.set_process_comments(options.process_comments);
        document.nodes.reserve(16);

        if !parser.scanner.stream_start_produced {
            match parser.parse() {
                Ok(Event {
                    data: EventData::StreamStart { .. },
                    ..
                }) => (),
                Ok(_) => panic!("expected stream start"),
                Err(err) => {
                    parser.delete_aliases();
                    return Err(err.into());
                }
            }
        }
        if parser.scanner.stream_end_produced {
            return Ok(document);
        }
        let err: ComposerError;
        match parser.parse() {
            Ok(event) => {
                if let EventData::StreamEnd = &event.data {
                    return Ok(document);
                }
                parser.aliases.reserve(16);
                match document.load_document(parser, event) {
                    Ok(()) => {
                        parser.delete_aliases();
                        return Ok(document);
                    }
                    Err(e) => err = e,
                }
            }
            Err(e) => err = e.into(),
        }
        parser.delete_aliases();
        Err(err)
    }

    fn set_composer_error<T>(
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ComposerError> {
        Err(ComposerError::Problem {
            problem,
            mark: problem_mark,
        })
    }

    fn set_composer_error_context<T>(
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ComposerError> {
        Err(ComposerError::ProblemWithContext {
            context,
            context_mark,
            problem,
            mark: problem_mark,
        })
    }

    fn load_document(&mut self, parser: &mut Parser, event: Event) -> Result<(), ComposerError> {
        let mut ctx = vec![];
        if let EventData::DocumentStart {
            version_directive,
            tag_directives,
            implicit,
        } = event.data
        {
            self.version_directive = version_directive;
            self.tag_directives = tag_directives;
            self.start_implicit = implicit;
            self.start_mark = event.start_mark;
            self.alias_counts.clear();
            ctx.reserve(16);
            if let Err(err) = self.load_nodes(parser, &mut ctx) {
                ctx.clear();
                return Err(err);
            }
            ctx.clear();
            Ok(())
        } else {
            panic!("Expected YAML_DOCUMENT_START_EVENT")
        }
    }

    fn load_nodes(&mut self, parser: &mut Parser, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        let end_implicit;
        let end_mark;

        loop {
            let event = parser.parse()?;
            match event.data {
                EventData::Comment { kind, value } => match kind {
                    CommentKind::BlockComment | CommentKind::BlankLine => {
                        self.pending_block_comments.push(value);
                    }
                    CommentKind::InLineComment => {
                        if self.last_added_node > 0 {
                            self.nodes[self.last_added_node as usize - 1]
                                .in_line_comments
                                .push(value);
                        }
                    }
                },
                EventData::StreamStart { .. } => panic!("unexpected stream start event"),
                EventData::StreamEnd => panic!("unexpected stream end event"),
                EventData::DocumentStart { .. } => panic!("unexpected document start event"),
                EventData::DocumentEnd { implicit } => {
                    end_implicit = implicit;
                    end_mark = event.end_mark;
                    break;
                }
                EventData::Alias { .. } => {
                    self.load_alias(parser, event, ctx)?;
                }
                EventData::Scalar { .. } => {
                    self.load_scalar(parser, event, ctx)?;
                }
                EventData::SequenceStart { .. } => {
                    self.load_sequence(parser, event, ctx)?;
                }
                EventData::SequenceEnd => {
                    self.load_sequence_end(event, ctx)?;
                }
                EventData::MappingStart { .. } => {
                    self.load_mapping(parser, event, ctx)?;
                }
                EventData::MappingEnd => {
                    self.load_mapping_end(event, ctx)?;
                }
            }
        }
        self.end_implicit = end_implicit;
        self.end_mark = end_mark;
        Ok(())
    }

    fn register_anchor(
        &mut self,
        parser: &mut Parser,
        index: i32,
        anchor: Option<String>,
    ) -> Result<(), ComposerError> {
        let Some(anchor) = anchor else {
            return Ok(());
        };
        let data = AliasData {
            anchor,
            index,
            mark: self.nodes[index as usize - 1].start_mark,
        };
        for alias_data in &parser.aliases {
            if alias_data.anchor == data.anchor {
                return Self::set_composer_error_context(
                    "found duplicate anchor; first occurrence",
                    alias_data.mark,
                    "second occurrence",
                    data.mark,
                );
            }
        }
        parser.aliases.push(data);
        Ok(())
    }

    fn load_node_add(&mut self, ctx: &[i32], index: i32) -> Result<(), ComposerError> {
        if ctx.is_empty() {
            return Ok(());
        }
        let parent_index: i32 = *ctx.last().unwrap();
        let is_mapping = matches!(
            self.nodes[parent_index as usize - 1].data,
            NodeData::Mapping { .. }
        );
        if is_mapping {
            return self.load_mapping_node_add(parent_index, index);
        }
        match &mut self.nodes[parent_index as usize - 1].data {
            NodeData::Sequence { ref mut items, .. } => {
                items.push(index);
            }
            _ => {
                panic!("document parent node is not a sequence or a mapping")
            }
        }
        Ok(())
    }

    fn scalar_value(&self, index: i32) -> Option<&str> {
        match &self.nodes[index as usize - 1].data {
            NodeData::Scalar { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    fn load_mapping_node_add(&mut self, parent_index: i32, index: i32) -> Result<(), ComposerError> {
        let pending_key = match &self.nodes[parent_index as usize - 1].data {
            NodeData::Mapping { pairs, .. } => {
                pairs.last().is_some_and(|p| p.key != 0 && p.value == 0)
            }
            _ => unreachable!(),
        };

        if pending_key {
            if let NodeData::Mapping { pairs, .. } = &mut self.nodes[parent_index as usize - 1].data
            {
                pairs.last_mut().unwrap().value = index;
            }
            return Ok(());
        }

        let new_key_value = self.scalar_value(index).map(String::from);
        let mut duplicate_of = None;
        if let Some(ref new_value) = new_key_value {
            if let NodeData::Mapping { pairs, .. } = &self.nodes[parent_index as usize - 1].data {
                for (i, pair) in pairs.iter().enumerate() {
                    if self.scalar_value(pair.key) == Some(new_value.as_str()) {
                        duplicate_of = Some(i);
                        break;
                    }
                }
            }
        }

        if let Some(dup_index) = duplicate_of {
            if !self.allow_duplicate_keys {
                let mark = self.nodes[index as usize - 1].start_mark;
                return Self::set_composer_error_duplicate_key(mark);
            }
            if let NodeData::Mapping { pairs, .. } = &mut self.nodes[parent_index as usize - 1].data
            {
                pairs.remove(dup_index);
            }
        }

        if let NodeData::Mapping { pairs, .. } = &mut self.nodes[parent_index as usize - 1].data {
            pairs.push(NodePair { key: index, value: 0 });
        }
        Ok(())
    }

    fn set_composer_error_duplicate_key<T>(mark: Mark) -> Result<T, ComposerError> {
        Err(ComposerError::DuplicateKey { mark })
    }

    /// Take any block/blank-line comments collected since the last node,
    /// leaving the buffer empty for the next one.
    fn take_pending_block_comments(&mut self) -> Vec<String> {
        core::mem::take(&mut self.pending_block_comments)
    }

    fn load_alias(
        &mut self,
        parser: &mut Parser,
        event: Event,
        ctx: &[i32],
    ) -> Result<(), ComposerError> {
        let EventData::Alias { anchor } = &event.data else {
            unreachable!()
        };

        for alias_data in &parser.aliases {
            if alias_data.anchor == *anchor {
                let target = alias_data.index;
                if !matches!(self.nodes[target as usize - 1].data, NodeData::Scalar { .. }) {
                    let count = self.alias_counts.entry(target).or_insert(0);
                    *count += 1;
                    if *count > self.max_aliases_for_collections {
                        return Self::set_composer_error(
                            "number of aliases for non-scalar nodes exceeds the specified limit",
                            event.start_mark,
                        );
                    }
                }
                self.last_added_node = target;
                return self.load_node_add(ctx, target);
            }
        }

        Self::set_composer_error("found undefined alias", event.start_mark)
    }

    fn load_scalar(
        &mut self,
        parser: &mut Parser,
        event: Event,
        ctx: &[i32],
    ) -> Result<(), ComposerError> {
        let EventData::Scalar {
            mut tag,
            value,
            style,
            anchor,
            plain_implicit,
            ..
        } = event.data
        else {
            unreachable!()
        };

        if tag.is_none() {
            tag = Some(String::from(if plain_implicit {
                self.resolver.resolve_scalar(&value)
            } else {
                STR_TAG
            }));
        }
        let node = Node {
            data: NodeData::Scalar { value, style },
            tag,
            start_mark: event.start_mark,
            end_mark: event.end_mark,
            block_comments: self.take_pending_block_comments(),
            ..Default::default()
        };
        self.nodes.push(node);
        let index: i32 = self.nodes.len() as i32;
        self.register_anchor(parser, index, anchor)?;
        self.last_added_node = index;
        self.load_node_add(ctx, index)
    }

    fn load_sequence(
        &mut self,
        parser: &mut Parser,
        event: Event,
        ctx: &mut Vec<i32>,
    ) -> Result<(), ComposerError> {
        let EventData::SequenceStart {
            anchor,
            mut tag,
            style,
            ..
        } = event.data
        else {
            unreachable!()
        };

        if ctx.len() as i32 >= self.nesting_depth_limit {
            return Self::set_composer_error("nesting depth exceeds the specified limit", event.start_mark);
        }

        let mut items = Vec::with_capacity(16);

        if tag.is_none() {
            tag = Some(String::from(self.resolver.resolve_sequence()));
        }

        let node = Node {
            data: NodeData::Sequence {
                items: core::mem::take(&mut items),
                style,
            },
            tag,
            start_mark: event.start_mark,
            end_mark: event.end_mark,
            block_comments: self.take_pending_block_comments(),
            ..Default::default()
        };

        self.nodes.push(node);
        let index: i32 = self.nodes.len() as i32;
        self.register_anchor(parser, index, anchor)?;
        self.last_added_node = index;
        self.load_node_add(ctx, index)?;
        ctx.push(index);
        Ok(())
    }

    fn load_sequence_end(&mut self, event: Event, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        assert!(!ctx.is_empty());
        let index: i32 = *ctx.last().unwrap();
        assert!(matches!(
            self.nodes[index as usize - 1].data,
            NodeData::Sequence { .. }
        ));
        self.nodes[index as usize - 1].end_mark = event.end_mark;
        let end_comments = self.take_pending_block_comments();
        self.nodes[index as usize - 1].end_comments.extend(end_comments);
        self.last_added_node = index;
        _ = ctx.pop();
        Ok(())
    }

    fn load_mapping(
        &mut self,
        parser: &mut Parser,
        event: Event,
        ctx: &mut Vec<i32>,
    ) -> Result<(), ComposerError> {
        let EventData::MappingStart {
            anchor,
            mut tag,
            style,
            ..
        } = event.data
        else {
            unreachable!()
        };

        if ctx.len() as i32 >= self.nesting_depth_limit {
            return Self::set_composer_error("nesting depth exceeds the specified limit", event.start_mark);
        }

        let mut pairs = Vec::with_capacity(16);

        if tag.is_none() {
            tag = Some(String::from(self.resolver.resolve_mapping()));
        }
        let node = Node {
            data: NodeData::Mapping {
                pairs: core::mem::take(&mut pairs),
                style,
                merged: false,
            },
            tag,
            start_mark: event.start_mark,
            end_mark: event.end_mark,
            block_comments: self.take_pending_block_comments(),
            ..Default::default()
        };
        self.nodes.push(node);
        let index: i32 = self.nodes.len() as i32;
        self.register_anchor(parser, index, anchor)?;
        self.last_added_node = index;
        self.load_node_add(ctx, index)?;
        ctx.push(index);
        Ok(())
    }

    fn load_mapping_end(&mut self, event: Event, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        assert!(!ctx.is_empty());
        let index: i32 = *ctx.last().unwrap();
        assert!(matches!(
            self.nodes[index as usize - 1].data,
            NodeData::Mapping { .. }
        ));
        self.nodes[index as usize - 1].end_mark = event.end_mark;
        let end_comments = self.take_pending_block_comments();
        self.nodes[index as usize - 1].end_comments.extend(end_comments);
        self.last_added_node = index;
        self.resolve_merge_keys(index)?;
        _ = ctx.pop();
        Ok(())
    }

    fn is_merge_key(&self, index: i32) -> bool {
        self.nodes[index as usize - 1].tag.as_deref() == Some(MERGE_TAG)
    }

    /// Expand `<<` merge keys into the enclosing mapping, per YAML 1.1
    /// merge-key semantics: the mapping's own explicit keys take precedence
    /// over merged keys, and earlier merge sources take precedence over
    /// later ones.
    fn resolve_merge_keys(&mut self, index: i32) -> Result<(), ComposerError> {
        let has_merge = match &self.nodes[index as usize - 1].data {
            NodeData::Mapping { pairs, .. } => pairs.iter().any(|p| self.is_merge_key(p.key)),
            _ => unreachable!(),
        };
        if !has_merge {
            return Ok(());
        }

        let pairs = match &mut self.nodes[index as usize - 1].data {
            NodeData::Mapping { pairs, .. } => core::mem::take(pairs),
            _ => unreachable!(),
        };

        let mut merge_mark = self.nodes[index as usize - 1].start_mark;
        let mut own_pairs = Vec::with_capacity(pairs.len());
        let mut merge_sources: Vec<i32> = Vec::new();
        for pair in &pairs {
            if self.is_merge_key(pair.key) {
                merge_mark = self.nodes[pair.key as usize - 1].start_mark;
                match &self.nodes[pair.value as usize - 1].data {
                    NodeData::Mapping { .. } => merge_sources.push(pair.value),
                    NodeData::Sequence { items, .. } => merge_sources.extend(items.iter().copied()),
                    _ => {
                        return Self::set_composer_error(
                            "merge key value must be a mapping or a sequence of mappings",
                            merge_mark,
                        )
                    }
                }
            } else {
                own_pairs.push(*pair);
            }
        }

        // Own keys take precedence over merge-source keys on collision, but
        // merged-in keys keep their source position ahead of the node's own
        // keys in the final order.
        let mut seen: Vec<String> = own_pairs
            .iter()
            .filter_map(|p| self.scalar_value(p.key).map(String::from))
            .collect();
        let mut merged = Vec::with_capacity(pairs.len());

        for source in merge_sources {
            let source_pairs = match &self.nodes[source as usize - 1].data {
                NodeData::Mapping { pairs, .. } => pairs.clone(),
                _ => {
                    return Self::set_composer_error(
                        "merge key value must be a mapping or a sequence of mappings",
                        merge_mark,
                    )
                }
            };
            for source_pair in source_pairs {
                if let Some(key_value) = self.scalar_value(source_pair.key) {
                    if seen.iter().any(|seen_key| seen_key == key_value) {
                        continue;
                    }
                    seen.push(String::from(key_value));
                }
                merged.push(source_pair);
            }
        }
        merged.extend(own_pairs);

        if let NodeData::Mapping {
            pairs,
            merged: merged_flag,
            ..
        } = &mut self.nodes[index as usize - 1].data
        {
            *pairs = merged;
            *merged_flag = true;
        }
        Ok(())
    }

    /// Emit the document using the given emitter.
    ///
    /// The document object may be produced by [`Document::load()`] or built
    /// manually. The emitter takes responsibility for the document's nodes
    /// and clears them once emitted, even if the function fails partway
    /// through.
    pub fn dump(&mut self, emitter: &mut Emitter) -> Result<(), EmitterError> {
        if self.process_comments {
            emitter.set_process_comments(true);
        }
        if !emitter.opened {
            if let Err(err) = emitter.open() {
                self.delete_and_reset(emitter);
                return Err(err);
            }
        }

        if self.nodes.is_empty() {
            emitter.close()?;
        } else {
            assert!(emitter.opened);
            emitter.anchors = vec![AnchorInfo::default(); self.nodes.len()];

            let event = Event {
                data: EventData::DocumentStart {
                    version_directive: self.version_directive,
                    tag_directives: core::mem::take(&mut self.tag_directives),
                    implicit: self.start_implicit,
                },
                start_mark: Mark::default(),
                end_mark: Mark::default(),
            };
            emitter.emit(event)?;

            self.anchor_node(emitter, 1);
            self.dump_node(emitter, 1)?;

            let event = Event {
                data: EventData::DocumentEnd {
                    implicit: self.end_implicit,
                },
                start_mark: Mark::default(),
                end_mark: Mark::default(),
            };
            emitter.emit(event)?;
        }

        self.delete_and_reset(emitter);
        Ok(())
    }

    fn delete_and_reset(&mut self, emitter: &mut Emitter) {
        if emitter.anchors.is_empty() {
            self.nodes.clear();
            return;
        }

        for node in &mut self.nodes {
            if let NodeData::Sequence { ref mut items, .. } = node.data {
                items.clear();
            }
            if let NodeData::Mapping { ref mut pairs, .. } = node.data {
                pairs.clear();
            }
        }

        self.nodes.clear();
        emitter.anchors.clear();
        emitter.last_anchor_id = 0;
    }

    fn anchor_node_sub(emitter: &mut Emitter, index: i32) {
        emitter.anchors[index as usize - 1].references += 1;
        if emitter.anchors[index as usize - 1].references == 2 {
            emitter.last_anchor_id += 1;
            emitter.anchors[index as usize - 1].anchor = emitter.last_anchor_id;
        }
    }

    fn anchor_node(&self, emitter: &mut Emitter, index: i32) {
        let node = &self.nodes[index as usize - 1];
        emitter.anchors[index as usize - 1].references += 1;
        if emitter.anchors[index as usize - 1].references == 1 {
            match &node.data {
                NodeData::Sequence { items, .. } => {
                    for item in items.iter() {
                        Self::anchor_node_sub(emitter, *item);
                    }
                }
                NodeData::Mapping { pairs, .. } => {
                    for pair in pairs.iter() {
                        Self::anchor_node_sub(emitter, pair.key);
                        Self::anchor_node_sub(emitter, pair.value);
                    }
                }
                _ => {}
            }
        } else if emitter.anchors[index as usize - 1].references == 2 {
            emitter.last_anchor_id += 1;
            emitter.anchors[index as usize - 1].anchor = emitter.last_anchor_id;
        }
    }

    fn generate_anchor(emitter: &mut Emitter, anchor_id: i32) -> String {
        if let Some(generator) = emitter.anchor_generator.as_mut() {
            generator(anchor_id)
        } else {
            format!("id{anchor_id:03}")
        }
    }

    fn dump_node(&mut self, emitter: &mut Emitter, index: i32) -> Result<(), EmitterError> {
        let anchor_id = emitter.anchors[index as usize - 1].anchor;
        let anchor = if anchor_id != 0 {
            Some(Self::generate_anchor(emitter, anchor_id))
        } else {
            None
        };
        if emitter.anchors[index as usize - 1].serialized {
            return Self::dump_alias(emitter, anchor.unwrap());
        }
        emitter.anchors[index as usize - 1].serialized = true;

        let node = core::mem::take(&mut self.nodes[index as usize - 1]);
        match node.data {
            NodeData::Scalar { .. } => Self::dump_scalar(emitter, node, anchor),
            NodeData::Sequence { .. } => self.dump_sequence(emitter, node, anchor),
            NodeData::Mapping { .. } => self.dump_mapping(emitter, node, anchor),
            NodeData::NoNode => unreachable!("document node without content"),
        }
    }

    fn dump_alias(emitter: &mut Emitter, anchor: String) -> Result<(), EmitterError> {
        emitter.emit(Event::alias(&anchor))
    }

    /// Write each collected comment ahead of the node it was attached to.
    /// An empty string marks a blank line rather than an empty `#` comment.
    fn dump_block_comments(emitter: &mut Emitter, comments: &[String]) -> Result<(), EmitterError> {
        for comment in comments {
            let event = if comment.is_empty() {
                Event::comment(CommentKind::BlankLine, "")
            } else {
                Event::comment(CommentKind::BlockComment, comment)
            };
            emitter.emit(event)?;
        }
        Ok(())
    }

    fn dump_in_line_comments(emitter: &mut Emitter, comments: &[String]) -> Result<(), EmitterError> {
        for comment in comments {
            emitter.emit(Event::comment(CommentKind::InLineComment, comment))?;
        }
        Ok(())
    }

    fn dump_scalar(
        emitter: &mut Emitter,
        mut node: Node,
        anchor: Option<String>,
    ) -> Result<(), EmitterError> {
        let block_comments = core::mem::take(&mut node.block_comments);
        let in_line_comments = core::mem::take(&mut node.in_line_comments);
        if emitter.process_comments {
            Self::dump_block_comments(emitter, &block_comments)?;
        }

        let NodeData::Scalar { value, style } = node.data else {
            unreachable!()
        };

        let (tag, value, style) = if emitter.non_printable_style == NonPrintableStyle::Binary
            && (node.tag.is_none() || node.tag.as_deref() == Some(STR_TAG))
            && value.chars().any(|c| !is_printable(c))
            && value.chars().all(|c| u32::from(c) <= 0xFF)
        {
            let bytes: Vec<u8> = value.chars().map(|c| c as u8).collect();
            (
                Some(String::from(BINARY_TAG)),
                encode_binary(&bytes),
                ScalarStyle::Literal,
            )
        } else {
            (node.tag, value, style)
        };

        let plain_implicit = tag.as_deref() == Some(STR_TAG);
        let quoted_implicit = tag.as_deref() == Some(STR_TAG);

        let event = Event {
            data: EventData::Scalar {
                anchor,
                tag,
                value,
                plain_implicit,
                quoted_implicit,
                style,
            },
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        };
        emitter.emit(event)?;

        if emitter.process_comments {
            Self::dump_in_line_comments(emitter, &in_line_comments)?;
        }
        Ok(())
    }

    fn dump_sequence(
        &mut self,
        emitter: &mut Emitter,
        mut node: Node,
        anchor: Option<String>,
    ) -> Result<(), EmitterError> {
        let block_comments = core::mem::take(&mut node.block_comments);
        let in_line_comments = core::mem::take(&mut node.in_line_comments);
        let end_comments = core::mem::take(&mut node.end_comments);
        if emitter.process_comments {
            Self::dump_block_comments(emitter, &block_comments)?;
        }

        let implicit = node.tag.as_deref() == Some(SEQ_TAG);

        let NodeData::Sequence { items, style } = node.data else {
            unreachable!()
        };

        let event = Event {
            data: EventData::SequenceStart {
                anchor,
                tag: node.tag,
                implicit,
                style,
            },
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        };
        emitter.emit(event)?;
        if emitter.process_comments {
            Self::dump_in_line_comments(emitter, &in_line_comments)?;
        }
        for item in items {
            self.dump_node(emitter, item)?;
        }
        if emitter.process_comments {
            Self::dump_block_comments(emitter, &end_comments)?;
        }
        emitter.emit(Event::sequence_end())
    }

    fn dump_mapping(
        &mut self,
        emitter: &mut Emitter,
        mut node: Node,
        anchor: Option<String>,
    ) -> Result<(), EmitterError> {
        let block_comments = core::mem::take(&mut node.block_comments);
        let in_line_comments = core::mem::take(&mut node.in_line_comments);
        let end_comments = core::mem::take(&mut node.end_comments);
        if emitter.process_comments {
            Self::dump_block_comments(emitter, &block_comments)?;
        }

        let implicit = node.tag.as_deref() == Some(MAP_TAG);

        let NodeData::Mapping { pairs, style, .. } = node.data else {
            unreachable!()
        };

        let event = Event {
            data: EventData::MappingStart {
                anchor,
                tag: node.tag,
                implicit,
                style,
            },
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        };
        emitter.emit(event)?;
        if emitter.process_comments {
            Self::dump_in_line_comments(emitter, &in_line_comments)?;
        }
        for pair in pairs {
            self.dump_node(emitter, pair.key)?;
            self.dump_node(emitter, pair.value)?;
        }
        if emitter.process_comments {
            Self::dump_block_comments(emitter, &end_comments)?;
        }
        emitter.emit(Event::mapping_end())
    }
}
