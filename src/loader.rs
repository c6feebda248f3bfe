use crate::{ComposerError, Document, Parser};

/// Parse the input stream and produce the next YAML document.
///
/// Call this function subsequently to produce a sequence of documents
/// constituting the input stream.
///
/// If the produced document has no root node, it means that the document end
/// has been reached.
///
/// An application must not alternate the calls of [`yaml_parser_load()`] with
/// the calls of [`yaml_parser_scan()`](crate::yaml_parser_scan) or
/// [`Parser::parse()`]. Doing this will break the parser.
pub fn yaml_parser_load(parser: &mut Parser) -> Result<Document, ComposerError> {
    Document::load(parser)
}
