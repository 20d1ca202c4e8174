//! The HMR scenarios run against every integration
//!
//! Scenarios share one page and one workspace, in catalogue order: each one
//! starts from the file contents and DOM state the previous one left behind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::browser::{tag_name_of, text_of, PageDriver, Target};
use crate::error::{HarnessError, HarnessResult};
use crate::mutation::replace_first;
use crate::poll::{contains, expect_eventually, expect_eventually_by};
use crate::suite::SuiteContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioId {
    BasicComponent,
    AddExport,
    AddFileAndImport,
    CustomHook,
    ResetsHookState,
    RerunsChangedEffects,
    ClassComponents,
    StringComponentHoc,
    ChangeMethods,
    HotReloadContext,
    ExternalJsx,
}

impl ScenarioId {
    /// Execution order
    pub const ALL: [ScenarioId; 11] = [
        ScenarioId::BasicComponent,
        ScenarioId::AddExport,
        ScenarioId::AddFileAndImport,
        ScenarioId::CustomHook,
        ScenarioId::ResetsHookState,
        ScenarioId::RerunsChangedEffects,
        ScenarioId::ClassComponents,
        ScenarioId::StringComponentHoc,
        ScenarioId::ChangeMethods,
        ScenarioId::HotReloadContext,
        ScenarioId::ExternalJsx,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioId::BasicComponent => "basic-component",
            ScenarioId::AddExport => "add-export",
            ScenarioId::AddFileAndImport => "add-file-and-import",
            ScenarioId::CustomHook => "custom-hook",
            ScenarioId::ResetsHookState => "resets-hook-state",
            ScenarioId::RerunsChangedEffects => "reruns-changed-effects",
            ScenarioId::ClassComponents => "class-components",
            ScenarioId::StringComponentHoc => "string-component-hoc",
            ScenarioId::ChangeMethods => "change-methods",
            ScenarioId::HotReloadContext => "hot-reload-context",
            ScenarioId::ExternalJsx => "external-jsx",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScenarioId::BasicComponent => "basic component",
            ScenarioId::AddExport => "add export",
            ScenarioId::AddFileAndImport => "add file and import it",
            ScenarioId::CustomHook => "custom hook",
            ScenarioId::ResetsHookState => "resets hook state",
            ScenarioId::RerunsChangedEffects => "re-runs changed effects",
            ScenarioId::ClassComponents => "works for class components",
            ScenarioId::StringComponentHoc => "string component through a higher-order component",
            ScenarioId::ChangeMethods => "can change methods",
            ScenarioId::HotReloadContext => "can hot reload context",
            ScenarioId::ExternalJsx => "can hot reload externally defined JSX",
        }
    }

    pub async fn run<D: PageDriver>(self, ctx: &SuiteContext<D>) -> HarnessResult<()> {
        debug!("Scenario {}: {}", self, self.description());
        match self {
            ScenarioId::BasicComponent => basic_component(ctx).await,
            ScenarioId::AddExport => add_export(ctx).await,
            ScenarioId::AddFileAndImport => add_file_and_import(ctx).await,
            ScenarioId::CustomHook => custom_hook(ctx).await,
            ScenarioId::ResetsHookState => resets_hook_state(ctx).await,
            ScenarioId::RerunsChangedEffects => reruns_changed_effects(ctx).await,
            ScenarioId::ClassComponents => class_components(ctx).await,
            ScenarioId::StringComponentHoc => string_component_hoc(ctx).await,
            ScenarioId::ChangeMethods => change_methods(ctx).await,
            ScenarioId::HotReloadContext => hot_reload_context(ctx).await,
            ScenarioId::ExternalJsx => external_jsx(ctx).await,
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioId {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| HarnessError::InvalidConfig(format!("unknown scenario: {}", s)))
    }
}

/// Wait for `selector` to render and return its element
async fn element<D: PageDriver>(
    ctx: &SuiteContext<D>,
    selector: &str,
) -> HarnessResult<D::Element> {
    let page = ctx.page()?;
    let found = expect_eventually_by(
        || page.query(selector),
        Option::is_some,
        &format!("an element matching {}", selector),
        ctx.poll_options(),
    )
    .await?;
    found
        .value
        .ok_or_else(|| HarnessError::ElementNotFound(selector.to_string()))
}

async fn expect_text<D: PageDriver>(
    ctx: &SuiteContext<D>,
    target: Target<'_, D::Element>,
    expected: &str,
) -> HarnessResult<()> {
    let page = ctx.page()?;
    expect_eventually(
        || text_of(page, target),
        Some(expected.to_string()),
        ctx.poll_options(),
    )
    .await?;
    Ok(())
}

async fn expect_tag<D: PageDriver>(
    ctx: &SuiteContext<D>,
    selector: &str,
    expected: &str,
) -> HarnessResult<()> {
    let page = ctx.page()?;
    expect_eventually(
        || tag_name_of(page, Target::Selector(selector)),
        Some(expected.to_string()),
        ctx.poll_options(),
    )
    .await?;
    Ok(())
}

async fn click<D: PageDriver>(ctx: &SuiteContext<D>, element: &D::Element) -> HarnessResult<()> {
    ctx.page()?.click(element).await
}

async fn basic_component<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let button = element(ctx, ".button").await?;
    expect_text(ctx, Target::Element(&button), "Increment").await?;

    ctx.update_file("src/app.jsx", |c| replace_first(c, "Increment", "Increment (+)"))
        .await?;
    ctx.settle().await;

    expect_text(ctx, Target::Element(&button), "Increment (+)").await
}

async fn add_export<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let button = element(ctx, ".button").await?;
    expect_text(ctx, Target::Element(&button), "Increment (+)").await?;

    ctx.update_file("src/app.jsx", |c| {
        replace_first(c, "function Test", "export function Test")
    })
    .await?;
    ctx.settle().await;

    // Exporting the component must not cost it its hot-swapped render
    expect_text(ctx, Target::Element(&button), "Increment (+)").await
}

const TESTER_COMPONENT: &str = r#"import { h } from 'preact';
export const Tester = () => <p className="tester">Test</p>;
"#;

async fn add_file_and_import<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    ctx.write_file("src/test.jsx", TESTER_COMPONENT).await?;
    ctx.update_file("src/app.jsx", |c| {
        let with_import = format!("import {{ Tester }} from \"./test.jsx\";\n{}", c);
        replace_first(&with_import, "<Test />", "<Test />\n      <Tester />\n")
    })
    .await?;
    ctx.long_settle().await;

    expect_text(ctx, Target::Selector(".tester"), "Test").await?;

    ctx.update_file("src/test.jsx", |c| {
        replace_first(
            c,
            "<p className=\"tester\">Test</p>",
            "<p className=\"tester\">Test2</p>",
        )
    })
    .await?;
    ctx.long_settle().await;

    expect_text(ctx, Target::Selector(".tester"), "Test2").await
}

async fn custom_hook<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let value = element(ctx, ".value").await?;
    let button = element(ctx, ".button").await?;
    expect_text(ctx, Target::Element(&value), "Count: 0").await?;

    click(ctx, &button).await?;
    expect_text(ctx, Target::Element(&value), "Count: 1").await?;

    ctx.update_file("src/useCounter.js", |c| replace_first(c, "state + 1", "state + 2"))
        .await?;
    ctx.settle().await;

    // Hook state survives the swap; only the step changes
    click(ctx, &button).await?;
    expect_text(ctx, Target::Element(&value), "Count: 3").await?;

    ctx.update_file("src/useCounter.js", |c| replace_first(c, "useState(0)", "useState(10)"))
        .await?;
    ctx.settle().await;

    expect_text(ctx, Target::Element(&value), "Count: 10").await
}

async fn resets_hook_state<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let value = element(ctx, ".value").await?;

    ctx.update_file("src/useCounter.js", |c| replace_first(c, "useState(0);", "useState(10);"))
        .await?;
    ctx.settle().await;

    expect_text(ctx, Target::Element(&value), "Count: 10").await
}

async fn reruns_changed_effects<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let effect = element(ctx, "#effect-test").await?;
    expect_text(ctx, Target::Element(&effect), "hello world").await?;

    ctx.update_file("src/effect.jsx", |c| {
        replace_first(
            c,
            "useEffect(() => { setState('hello world'); }, []);",
            "useEffect(() => { setState('changed world'); }, []);",
        )
    })
    .await?;
    ctx.settle().await;

    expect_text(ctx, Target::Element(&effect), "changed world").await
}

async fn class_components<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let text = element(ctx, ".class-text").await?;
    expect_text(ctx, Target::Element(&text), "I'm a class component").await?;

    ctx.update_file("src/greeting.jsx", |c| {
        replace_first(c, "I'm a class component", "I'm a reloaded class component")
    })
    .await?;
    ctx.settle().await;

    expect_text(ctx, Target::Element(&text), "I'm a reloaded class component").await
}

const DECORATED_COMPONENT: &str = r#"import { h } from 'preact';
const hoc = (val) => val;
const StringBasedComponent = "span";
const DecoratedStringBasedComponent = hoc(StringBasedComponent);
export default DecoratedStringBasedComponent;
"#;

const DECORATED_IMPORT: &str =
    "import DecoratedStringBasedComponent from \"./decoratedStringBasedComponent.jsx\";\n";

const DECORATED_USAGE: &str = r#"<Test />
      <DecoratedStringBasedComponent className="decorated-string-based-component" />
"#;

async fn string_component_hoc<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    const SELECTOR: &str = ".decorated-string-based-component";

    ctx.write_file("src/decoratedStringBasedComponent.jsx", DECORATED_COMPONENT)
        .await?;
    ctx.update_file("src/app.jsx", |c| {
        let with_import = format!("{}{}", DECORATED_IMPORT, c);
        replace_first(&with_import, "<Test />", DECORATED_USAGE)
    })
    .await?;
    ctx.long_settle().await;

    expect_tag(ctx, SELECTOR, "SPAN").await?;

    ctx.update_file("src/decoratedStringBasedComponent.jsx", |c| {
        replace_first(c, "\"span\"", "\"div\"")
    })
    .await?;
    ctx.long_settle().await;

    expect_tag(ctx, SELECTOR, "DIV").await
}

async fn change_methods<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let text = element(ctx, ".greeting-text").await?;
    let button = element(ctx, ".greeting-button").await?;
    expect_text(ctx, Target::Element(&text), "hi").await?;

    click(ctx, &button).await?;
    expect_text(ctx, Target::Element(&text), "bye").await?;

    ctx.update_file("src/greeting.jsx", |c| {
        replace_first(
            c,
            "this.setState({ greeting: 'bye' });",
            "this.setState({ greeting: 'hello' });",
        )
    })
    .await?;
    ctx.settle().await;

    click(ctx, &button).await?;
    expect_text(ctx, Target::Element(&text), "hello").await
}

/// Text of every `li` under `store`, in document order
async fn store_items<D: PageDriver>(
    page: &D,
    store: &D::Element,
) -> HarnessResult<Vec<Option<String>>> {
    let mut texts = Vec::new();
    for item in page.query_all_within(store, "li").await? {
        texts.push(page.element_text(&item).await?);
    }
    Ok(texts)
}

async fn hot_reload_context<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let apple = element(ctx, ".apple-div").await?;
    expect_text(ctx, Target::Element(&apple), "apple").await?;

    click(ctx, &apple).await?;
    let page = ctx.page()?;
    let store = element(ctx, ".store-items").await?;
    let store = &store;
    expect_eventually_by(
        move || async move {
            let items = store_items(page, store).await?;
            Ok::<_, HarnessError>(items.into_iter().next().flatten())
        },
        contains("apple"),
        "first store item containing \"apple\"",
        ctx.poll_options(),
    )
    .await?;

    ctx.update_file("src/context.jsx", |c| {
        replace_first(
            c,
            "if (!items.includes(id)) setItems([...items, id])",
            "setItems([...items, id])",
        )
    })
    .await?;
    ctx.settle().await;

    let peach = element(ctx, ".peach-div").await?;
    click(ctx, &peach).await?;

    let (apple_first, peach_second) = (contains("apple"), contains("peach"));
    expect_eventually_by(
        move || store_items(page, store),
        |items| {
            items.len() >= 2 && apple_first(&items[0]) && peach_second(&items[1])
        },
        "store items [\"apple\", \"peach\"]",
        ctx.poll_options(),
    )
    .await?;
    Ok(())
}

async fn external_jsx<D: PageDriver>(ctx: &SuiteContext<D>) -> HarnessResult<()> {
    let page = ctx.page()?;
    let background = || page.computed_style("#color", "background-color");

    expect_eventually(background, "rgb(0, 0, 0)".to_string(), ctx.poll_options()).await?;

    ctx.update_file("src/styles.js", |c| {
        replace_first(c, "background-color: #000;", "background-color: #fff;")
    })
    .await?;
    ctx.settle().await;

    expect_eventually(background, "rgb(255, 255, 255)".to_string(), ctx.poll_options()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakeNode};
    use crate::config::Timing;
    use crate::registry::{IntegrationConfig, IntegrationSpec};
    use crate::suite::{ScenarioStatus, ScenarioSuite, SuiteReport};
    use crate::workspace::WorkspaceManager;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use test_case::test_case;

    #[test]
    fn test_catalogue_order_is_stable() {
        assert_eq!(ScenarioId::ALL.first(), Some(&ScenarioId::BasicComponent));
        assert_eq!(ScenarioId::ALL.last(), Some(&ScenarioId::ExternalJsx));
        let mut sorted = ScenarioId::ALL;
        sorted.sort();
        assert_eq!(sorted, ScenarioId::ALL);
    }

    #[test_case(ScenarioId::BasicComponent, "basic-component")]
    #[test_case(ScenarioId::StringComponentHoc, "string-component-hoc")]
    #[test_case(ScenarioId::ExternalJsx, "external-jsx")]
    fn test_names_match_serde(id: ScenarioId, name: &str) {
        assert_eq!(id.as_str(), name);
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{}\"", name));
        assert_eq!(name.parse::<ScenarioId>().unwrap(), id);
    }

    #[test]
    fn test_unknown_scenario_name() {
        assert!("hmr-everything".parse::<ScenarioId>().is_err());
    }

    /// Text between `open` and the next `close`
    fn between<'s>(source: &'s str, open: &str, close: &str) -> Option<&'s str> {
        let rest = &source[source.find(open)? + open.len()..];
        Some(&rest[..rest.find(close)?])
    }

    /// Children of the tag carrying `marker`, up to the next tag
    fn inner_text(source: &str, marker: &str) -> Option<String> {
        let rest = &source[source.find(marker)? + marker.len()..];
        let rest = &rest[rest.find('>')? + 1..];
        Some(rest[..rest.find('<')?].trim().to_string())
    }

    /// `#abc` shorthand as a computed `rgb(..)` value
    fn rgb(hex: &str) -> Option<String> {
        let channels: Vec<u32> = hex
            .strip_prefix('#')?
            .chars()
            .map(|c| c.to_digit(16).map(|d| d * 17))
            .collect::<Option<_>>()?;
        match channels[..] {
            [r, g, b] => Some(format!("rgb({}, {}, {})", r, g, b)),
            _ => None,
        }
    }

    #[derive(Default)]
    struct AppState {
        count: i64,
        count_initial: Option<i64>,
        counter_source: String,
        counts_seen: Vec<i64>,
        greeting: Option<String>,
        store: Vec<String>,
    }

    impl AppState {
        fn set_count(&mut self, count: i64) {
            if self.counts_seen.last() != Some(&count) {
                self.counts_seen.push(count);
            }
            self.count = count;
        }
    }

    /// The bundled fixture app as a hot-reloading dev server would render
    /// it: markup comes from the workspace sources on every read, component
    /// state lives across edits the way Prefresh keeps it.
    struct HotFixture {
        workspace: PathBuf,
        /// Remount on every hook edit, losing hook state
        remount_on_edit: bool,
        state: Mutex<AppState>,
    }

    impl HotFixture {
        fn new(workspace: PathBuf, remount_on_edit: bool) -> Arc<Self> {
            Arc::new(Self {
                workspace,
                remount_on_edit,
                state: Mutex::default(),
            })
        }

        fn read(&self, file: &str) -> String {
            std::fs::read_to_string(self.workspace.join("src").join(file)).unwrap_or_default()
        }

        /// Re-apply useCounter.js: a changed initial value resets the hook
        fn reconcile(&self, state: &mut AppState) {
            let source = self.read("useCounter.js");
            let initial = between(&source, "useState(", ")")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            let edited = !state.counter_source.is_empty() && state.counter_source != source;
            let reset = state.count_initial != Some(initial) || (edited && self.remount_on_edit);
            state.counter_source = source;
            if reset {
                state.count_initial = Some(initial);
                state.set_count(initial);
            }
        }

        fn click(&self, selector: &str) {
            let mut state = self.state.lock();
            match selector {
                ".button" => {
                    self.reconcile(&mut state);
                    let step: i64 = between(&self.read("useCounter.js"), "setState(state + ", ")")
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    let next = state.count + step;
                    state.set_count(next);
                }
                ".greeting-button" => {
                    let greeting = self.read("greeting.jsx");
                    state.greeting = between(&greeting, "this.setState({ greeting: '", "'")
                        .map(str::to_string);
                }
                ".apple-div" | ".peach-div" => {
                    let fruit = selector[1..].trim_end_matches("-div").to_string();
                    let dedupe = self.read("context.jsx").contains("if (!items.includes(id))");
                    if !(dedupe && state.store.contains(&fruit)) {
                        state.store.push(fruit);
                    }
                }
                _ => {}
            }
        }

        fn render(&self) -> Vec<FakeNode> {
            let mut state = self.state.lock();
            self.reconcile(&mut state);

            let app = self.read("app.jsx");
            let effect = self.read("effect.jsx");
            let greeting = self.read("greeting.jsx");
            let node = |selector: &str, tag: &str, text: Option<String>| {
                text.map(|text| FakeNode::new(selector, tag, &text))
            };

            let mut nodes: Vec<FakeNode> = [
                node(".value", "p", Some(format!("Count: {}", state.count))),
                node(".button", "button", inner_text(&app, "className=\"button\"")),
                node(
                    "#effect-test",
                    "p",
                    between(&effect, "setState('", "')").map(str::to_string),
                ),
                node(".class-text", "p", inner_text(&greeting, "className=\"class-text\"")),
                node(
                    ".greeting-text",
                    "p",
                    state
                        .greeting
                        .clone()
                        .or_else(|| between(&greeting, "greeting: '", "'").map(str::to_string)),
                ),
                node(".greeting-button", "button", Some("Change greeting".into())),
                node(".apple-div", "div", Some("apple".into())),
                node(".peach-div", "div", Some("peach".into())),
                node(".store-items", "ul", Some(state.store.concat())),
            ]
            .into_iter()
            .flatten()
            .collect();

            for (i, item) in state.store.iter().enumerate() {
                nodes.push(FakeNode::new(&format!(".store-items li:{}", i), "li", item));
            }

            if app.contains("<Tester />") {
                let tester = inner_text(&self.read("test.jsx"), "className=\"tester\"");
                nodes.extend(node(".tester", "p", tester));
            }

            if app.contains("<DecoratedStringBasedComponent") {
                let source = self.read("decoratedStringBasedComponent.jsx");
                if let Some(tag) = between(&source, "const StringBasedComponent = \"", "\"") {
                    nodes.push(FakeNode::new(".decorated-string-based-component", tag, ""));
                }
            }

            let styles = self.read("styles.js");
            if let Some(color) = between(&styles, "background-color: ", ";").and_then(rgb) {
                let mut node = FakeNode::new("#color", "div", "");
                node.style.insert("background-color".into(), color);
                nodes.push(node);
            }

            nodes
        }

        fn counts_seen(&self) -> Vec<i64> {
            self.state.lock().counts_seen.clone()
        }

        fn store(&self) -> Vec<String> {
            self.state.lock().store.clone()
        }
    }

    fn launcher(app: &Arc<HotFixture>) -> FakeLauncher {
        let render = app.clone();
        let mut launcher = FakeLauncher::new(Arc::new(move || render.render()));
        let clicked = app.clone();
        launcher.on_click = Some(Arc::new(move |selector: &str| clicked.click(selector)));
        launcher
    }

    fn timing() -> Timing {
        Timing {
            settle_ms: 5,
            long_settle_ms: 10,
            poll_interval_ms: 5,
            poll_timeout_ms: 500,
            ready_timeout_ms: 5_000,
            http_check_timeout_ms: 1_000,
            suite_timeout_ms: 30_000,
            stop_grace_ms: 200,
            install_timeout_ms: 5_000,
        }
    }

    fn bundled_fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn integration(id: &str, fixture: &str, runs: &[ScenarioId]) -> Arc<IntegrationConfig> {
        let excluded: BTreeSet<ScenarioId> = ScenarioId::ALL
            .into_iter()
            .filter(|s| !runs.contains(s))
            .collect();
        Arc::new(
            IntegrationConfig::from_spec(IntegrationSpec {
                id: id.into(),
                launch_command: "sh".into(),
                launch_args: vec!["-c".into(), "echo ready; sleep 30".into()],
                listen_port: 5173,
                ready_pattern: "ready".into(),
                excluded_scenarios: excluded,
                fixture: Some(fixture.into()),
                check_http: false,
            })
            .unwrap(),
        )
    }

    /// Run `runs` against a hot-reloading copy of `fixture`
    async fn run_suite(
        fixtures: &Path,
        fixture: &str,
        runs: &[ScenarioId],
        remount_on_edit: bool,
    ) -> (SuiteReport, Arc<HotFixture>, FakeLauncher) {
        let temp = tempfile::tempdir().unwrap();
        let workspaces =
            WorkspaceManager::new(fixtures, temp.path(), vec![], Duration::from_secs(5));
        let app = HotFixture::new(workspaces.workspace_path(fixture), remount_on_edit);
        let launcher = launcher(&app);

        let report = ScenarioSuite::new(
            integration(fixture, fixture, runs),
            &workspaces,
            &launcher,
            timing(),
            false,
        )
        .run()
        .await;
        (report, app, launcher)
    }

    fn status(report: &SuiteReport, id: ScenarioId) -> ScenarioStatus {
        report
            .scenarios
            .iter()
            .find(|s| s.scenario == id)
            .map(|s| s.status)
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_catalogue_against_bundled_fixture() {
        let runs: Vec<ScenarioId> = ScenarioId::ALL
            .into_iter()
            .filter(|s| *s != ScenarioId::ExternalJsx)
            .collect();
        let (report, app, _) = run_suite(&bundled_fixtures(), "vite", &runs, false).await;

        assert!(report.success(), "{:#?}", report);
        assert_eq!(report.count(ScenarioStatus::Passed), ScenarioId::ALL.len() - 1);
        assert_eq!(status(&report, ScenarioId::ExternalJsx), ScenarioStatus::Skipped);
        assert_eq!(app.counts_seen(), vec![0, 1, 3, 10]);
        assert_eq!(app.store(), vec!["apple", "peach"]);

        // The canonical fixture is never edited
        let app_jsx =
            std::fs::read_to_string(bundled_fixtures().join("vite/src/app.jsx")).unwrap();
        assert!(!app_jsx.contains("Increment (+)"));
        assert!(!bundled_fixtures().join("vite/src/test.jsx").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_hook_counts_through_hot_swap() {
        let (report, app, launcher) =
            run_suite(&bundled_fixtures(), "vite", &[ScenarioId::CustomHook], false).await;

        assert!(report.success(), "{:#?}", report);
        assert_eq!(app.counts_seen(), vec![0, 1, 3, 10]);
        assert_eq!(*launcher.clicks.lock(), vec![".button", ".button"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_hook_catches_lost_hook_state() {
        let (report, app, _) =
            run_suite(&bundled_fixtures(), "vite", &[ScenarioId::CustomHook], true).await;

        assert!(!report.success());
        assert!(report.error.is_none());
        let custom = report
            .scenarios
            .iter()
            .find(|s| s.scenario == ScenarioId::CustomHook)
            .unwrap();
        assert_eq!(custom.status, ScenarioStatus::Failed);
        let error = custom.error.as_deref().unwrap();
        assert!(error.contains("Count: 3"), "{error}");
        assert!(error.contains("Count: 2"), "{error}");
        assert_eq!(app.counts_seen(), vec![0, 1, 0, 2]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hot_reload_context_lists_store_items() {
        let (report, app, launcher) =
            run_suite(&bundled_fixtures(), "vite", &[ScenarioId::HotReloadContext], false).await;

        assert!(report.success(), "{:#?}", report);
        assert_eq!(app.store(), vec!["apple", "peach"]);
        assert_eq!(*launcher.clicks.lock(), vec![".apple-div", ".peach-div"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_string_component_hoc_swaps_tag() {
        let (report, _, _) =
            run_suite(&bundled_fixtures(), "vite", &[ScenarioId::StringComponentHoc], false).await;

        assert!(report.success(), "{:#?}", report);
        assert_eq!(status(&report, ScenarioId::StringComponentHoc), ScenarioStatus::Passed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_jsx_follows_stylesheet() {
        let fixtures = tempfile::tempdir().unwrap();
        let src = fixtures.path().join("styled/src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("styles.js"),
            "export const styles = `#color { background-color: #000; }`;\n",
        )
        .unwrap();

        let (report, _, _) =
            run_suite(fixtures.path(), "styled", &[ScenarioId::ExternalJsx], false).await;

        assert!(report.success(), "{:#?}", report);
        assert_eq!(status(&report, ScenarioId::ExternalJsx), ScenarioStatus::Passed);
    }

    #[test]
    fn test_fixture_model_helpers() {
        assert_eq!(between("useState(10);", "useState(", ")"), Some("10"));
        assert_eq!(
            inner_text("<p className=\"tester\">Test2</p>", "className=\"tester\"").as_deref(),
            Some("Test2")
        );
        assert_eq!(rgb("#fff").as_deref(), Some("rgb(255, 255, 255)"));
        assert_eq!(rgb("red"), None);
    }
}
