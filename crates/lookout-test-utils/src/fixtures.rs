// fixtures: Shared document trees for integration tests.

use lookout_protocol::DomNode;

/// A small storefront page: a form with a sensitive and a plain input, a
/// button, and media elements for intersection tracking.
pub fn storefront_document() -> DomNode {
    DomNode::element("html").with_children(vec![
        DomNode::element("head").with_children(vec![
            DomNode::element("title").with_children(vec![DomNode::text("Storefront")]),
        ]),
        DomNode::element("body").with_children(vec![
            DomNode::element("div").with_attr("id", "app").with_children(vec![
                DomNode::element("form").with_children(vec![
                    DomNode::element("input")
                        .with_attr("type", "text")
                        .with_attr("name", "creditCard"),
                    DomNode::element("input")
                        .with_attr("type", "text")
                        .with_attr("name", "quantity"),
                    DomNode::element("button")
                        .with_attr("class", "buy")
                        .with_children(vec![DomNode::text("Buy now")]),
                ]),
                DomNode::element("img").with_attr("src", "/product.png"),
            ]),
        ]),
    ])
}
