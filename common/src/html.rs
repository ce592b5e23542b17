//! HTMLフラグメントの簡易ツリー
//!
//! バックエンドが返すHTML片（本文・カード・グリッド）を要素ツリーにし、
//! 要素の除去やカード属性の読み取りを行う。完全なHTMLパーサではなく、
//! 閉じ忘れ・不正な閉じタグは寛容に扱う。

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// 要素の入れ子の上限。これより深い開始タグは展開して中身だけ残す
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    pub fn is_heading(&self) -> bool {
        matches!(self.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.tag.as_str())
    }

    /// 子孫テキストを連結（エンティティはデコード）
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        decode_entities(&out)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// 深さ優先で条件に合う最初の子孫要素
    pub fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        find_in(&self.children, pred)
    }
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if !RAW_TEXT_ELEMENTS.contains(&el.tag.as_str()) => {
                collect_text(&el.children, out)
            }
            _ => {}
        }
    }
}

fn find_in<'a>(nodes: &'a [Node], pred: &dyn Fn(&Element) -> bool) -> Option<&'a Element> {
    for node in nodes {
        if let Node::Element(el) = node {
            if pred(el) {
                return Some(el);
            }
            if let Some(found) = find_in(&el.children, pred) {
                return Some(found);
            }
        }
    }
    None
}

/// 祖先要素の列（外側から順）を伴って全要素を訪問
pub fn walk<'a>(nodes: &'a [Node], visit: &mut dyn FnMut(&'a Element, &[&'a Element])) {
    fn go<'a>(
        nodes: &'a [Node],
        ancestors: &mut Vec<&'a Element>,
        visit: &mut dyn FnMut(&'a Element, &[&'a Element]),
    ) {
        for node in nodes {
            if let Node::Element(el) = node {
                visit(el, ancestors);
                ancestors.push(el);
                go(&el.children, ancestors, visit);
                ancestors.pop();
            }
        }
    }
    go(nodes, &mut Vec::new(), visit);
}

/// 全ノードのテキスト
pub fn text_of(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    decode_entities(&out)
}

/// 主要な文字参照のみデコード
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let Some(end) = tail.find(';').filter(|end| *end <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// 属性値用のエスケープ
pub fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// テキスト用のエスケープ
pub fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTMLフラグメントを解析
pub fn parse_fragment(html: &str) -> Vec<Node> {
    let mut parser = Parser {
        src: html,
        pos: 0,
        root: Vec::new(),
        stack: Vec::new(),
        flattened: Vec::new(),
    };
    parser.run();
    parser.root
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    root: Vec<Node>,
    stack: Vec<Element>,
    /// 上限を超えて捨てた開始タグ名（対応する閉じタグを読み飛ばす）
    flattened: Vec<String>,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.root.push(node),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let target = match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.root,
        };
        if let Some(Node::Text(prev)) = target.last_mut() {
            prev.push_str(text);
        } else {
            target.push(Node::Text(text.to_string()));
        }
    }

    fn close_top(&mut self) {
        if let Some(el) = self.stack.pop() {
            self.push_node(Node::Element(el));
        }
    }

    fn run(&mut self) {
        while self.pos < self.src.len() {
            let rest = self.rest();
            let Some(lt) = rest.find('<') else {
                self.push_text(rest);
                self.pos = self.src.len();
                break;
            };
            let text = &rest[..lt];
            self.push_text(text);
            self.pos += lt;

            let rest = self.rest();
            if let Some(body) = rest.strip_prefix("<!--") {
                let end = body.find("-->").unwrap_or(body.len());
                self.push_node(Node::Comment(body[..end].to_string()));
                self.pos += 4 + (end + 3).min(body.len());
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                // doctype・処理命令は捨てる
                let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
                self.pos += end;
            } else if let Some(body) = rest.strip_prefix("</") {
                let end = body.find('>').unwrap_or(body.len());
                let name = body[..end].trim().to_lowercase();
                self.pos += 2 + (end + 1).min(body.len());
                self.close_tag(&name);
            } else if rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                self.open_tag();
            } else {
                self.push_text("<");
                self.pos += 1;
            }
        }
        while !self.stack.is_empty() {
            self.close_top();
        }
    }

    fn close_tag(&mut self, name: &str) {
        if let Some(pos) = self.flattened.iter().rposition(|tag| tag == name) {
            self.flattened.truncate(pos);
            return;
        }
        if !self.stack.iter().any(|el| el.tag == name) {
            return;
        }
        while let Some(top) = self.stack.last() {
            let matched = top.tag == name;
            self.close_top();
            if matched {
                break;
            }
        }
    }

    fn open_tag(&mut self) {
        let bytes = self.src.as_bytes();
        let mut i = self.pos + 1;
        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/' {
            i += 1;
        }
        let mut element = Element::new(&self.src[name_start..i]);
        let mut self_closing = false;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            match bytes[i] {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    self_closing = true;
                    i += 1;
                    continue;
                }
                _ => {}
            }
            let attr_start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            let name = self.src[attr_start..i].to_lowercase();
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let mut value = String::new();
            if i < bytes.len() && bytes[i] == b'=' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                    let quote = bytes[i];
                    let start = i + 1;
                    let end = self.src[start..]
                        .bytes()
                        .position(|b| b == quote)
                        .map(|p| start + p)
                        .unwrap_or(bytes.len());
                    value = self.src[start..end].to_string();
                    i = (end + 1).min(bytes.len());
                } else {
                    let start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = self.src[start..i].to_string();
                }
            }
            if !name.is_empty() {
                element.attrs.push((name, decode_entities(&value)));
            } else if i == attr_start {
                i += 1;
            }
        }
        self.pos = i.min(self.src.len());

        if self_closing || element.is_void() {
            self.push_node(Node::Element(element));
            return;
        }
        if RAW_TEXT_ELEMENTS.contains(&element.tag.as_str()) {
            let closing = format!("</{}", element.tag);
            let rest = self.rest();
            let end = find_ignore_ascii_case(rest, &closing).unwrap_or(rest.len());
            if end > 0 {
                element.children.push(Node::Text(rest[..end].to_string()));
            }
            self.pos += end;
            let after = self.rest();
            if !after.is_empty() {
                self.pos += after.find('>').map(|p| p + 1).unwrap_or(after.len());
            }
            self.push_node(Node::Element(element));
            return;
        }
        if self.stack.len() >= MAX_DEPTH {
            self.flattened.push(element.tag);
            return;
        }
        self.stack.push(element);
    }
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// ツリーをHTML文字列へ
pub fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    render_into(nodes, &mut out);
    out
}

fn render_into(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            Node::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if el.is_void() {
                    continue;
                }
                render_into(&el.children, out);
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}
