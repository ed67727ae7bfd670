/// The graph query surface, as described to the model.
pub const GRAPH_SCHEMA: &str = "\
SQLite database of a JavaScript/TypeScript call graph.

Tables:
  files(id INTEGER, path TEXT)                          -- one row per source file
  functions(id INTEGER, name TEXT, path TEXT, body TEXT) -- top-level function declarations
  imports_from(id INTEGER, source_id INTEGER, target_id INTEGER, clause TEXT)
      -- files.id -> files.id; clause is the imported symbol name
  calls(id INTEGER, caller_id INTEGER, callee_id INTEGER)
      -- functions.id -> functions.id

Views that add a JSON graph element column:
  file_nodes(id, path, node)
  function_nodes(id, name, path, node)
  imports_from_rels(id, source_id, target_id, clause, rel)
  calls_rels(id, caller_id, callee_id, rel)

Select the node/rel columns to return graph elements, e.g.
  SELECT a.node AS caller, c.rel AS call, b.node AS callee
  FROM calls_rels c
  JOIN function_nodes a ON a.id = c.caller_id
  JOIN function_nodes b ON b.id = c.callee_id
  WHERE b.name = 'parseConfig';
json_group_array(...) over node/rel columns returns a list.
Only SELECT statements are allowed.";

pub fn classify(query: &str) -> String {
    format!(
        "You route questions about a codebase to one of two search strategies.\n\
         - \"vector\": the question describes what some code does, its purpose or behavior \
         (e.g. \"where do we validate tokens?\").\n\
         - \"graph\": the question is about structure: who calls what, imports, \
         dependencies between files or functions.\n\n\
         Question: {query}\n\n\
         Respond ONLY with valid JSON: {{\"decision\": \"vector\" or \"graph\", \"rationale\": \"one sentence\"}}"
    )
}

pub fn generate_graph_query(query: &str, prior_error: Option<&str>) -> String {
    let mut prompt = format!(
        "{GRAPH_SCHEMA}\n\n\
         Write one SQLite SELECT statement that answers the question below.\n\
         Question: {query}\n"
    );
    if let Some(err) = prior_error {
        prompt.push_str(&format!(
            "\nYour previous query failed with this error:\n{err}\nFix the query.\n"
        ));
    }
    prompt.push_str("\nRespond ONLY with valid JSON: {\"query\": \"SELECT ...\"}");
    prompt
}

pub fn summarize(code: &str) -> String {
    format!(
        "Describe what this function does in one or two sentences. \
         Mention its inputs, outputs and side effects. No preamble.\n\n```\n{code}\n```"
    )
}

pub fn answer(query: &str, context: &str) -> String {
    format!(
        "Answer the question about the codebase using only the context below. \
         If the context does not contain the answer, say so.\n\n\
         Question: {query}\n\nContext:\n{context}"
    )
}
