use std::collections::HashMap;
use std::sync::Arc;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::TermEvent;
use crate::runtime::{Model, UpdateResult};

/// A bidirectional conversion between a parent message type and a child's,
/// playing the role the dynamic original's routing-symbol "prefix" played:
/// `wrap` builds a parent message from a child one, `unwrap` recovers the
/// child message from a parent one (or hands the parent message back
/// unchanged, in `Err`, when it wasn't meant for this child).
#[derive(Clone)]
pub struct Prefix<Msg, ChildMsg> {
    wrap: Arc<dyn Fn(ChildMsg) -> Msg + Send + Sync>,
    unwrap: Arc<dyn Fn(Msg) -> std::result::Result<ChildMsg, Msg> + Send + Sync>,
}

impl<Msg, ChildMsg> Prefix<Msg, ChildMsg> {
    pub fn new(
        wrap: impl Fn(ChildMsg) -> Msg + Send + Sync + 'static,
        unwrap: impl Fn(Msg) -> std::result::Result<ChildMsg, Msg> + Send + Sync + 'static,
    ) -> Self {
        Self {
            wrap: Arc::new(wrap),
            unwrap: Arc::new(unwrap),
        }
    }
}

/// Labels a child's command results so a parent's update can route them back
/// through [`delegate`]. `route(command, prefix) = Command::map(command, |m|
/// prefix.wrap(m))`.
pub fn route<Msg, ChildMsg>(command: Command<ChildMsg>, prefix: &Prefix<Msg, ChildMsg>) -> Command<Msg>
where
    Msg: Send + 'static,
    ChildMsg: Send + 'static,
{
    let wrap = prefix.wrap.clone();
    Command::map(command, move |m| wrap(m))
}

/// If `message` is meant for this child (`prefix.unwrap` succeeds), invokes
/// `child_update` and returns the new child model plus a routed command.
/// Otherwise returns `None` so the parent may try other routes.
pub fn delegate<Msg, ChildMsg, ChildModel>(
    message: Msg,
    prefix: &Prefix<Msg, ChildMsg>,
    child_update: impl FnOnce(ChildMsg, &ChildModel) -> UpdateResult<ChildModel, ChildMsg>,
    child_model: &ChildModel,
) -> Option<(ChildModel, Option<Command<Msg>>)>
where
    Msg: Send + 'static,
    ChildMsg: Send + 'static,
    ChildModel: Clone,
{
    match (prefix.unwrap)(message) {
        Ok(child_message) => {
            let (new_child_model, command) = child_update(child_message, child_model).normalize(child_model);
            Some((new_child_model, command.map(|c| route(c, prefix))))
        }
        Err(_not_for_this_child) => None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum GuardKind {
    When,
    Unless,
}

type GuardFn<Model> = Arc<dyn Fn(&Model) -> bool + Send + Sync>;
type Handler<Model, Msg> = Arc<dyn Fn(&Model) -> UpdateResult<Model, Msg> + Send + Sync>;

/// A key rule's handler is either given inline or by the name of an action
/// registered via [`RouterBuilder::action`]; named handlers are resolved
/// against the builder's action table at [`RouterBuilder::build`] time.
enum HandlerSource<Model, Msg> {
    Direct(Handler<Model, Msg>),
    Named(String),
}

/// One keymap registration: which key it fires on, what it does, and an
/// optional guard. `when`/`only_if` are synonyms for a positive guard;
/// `unless`/`except_if` are synonyms for the negated one.
pub struct KeyRule<Model, Msg> {
    predicate: Arc<dyn Fn(&TermEvent) -> bool + Send + Sync>,
    handler: HandlerSource<Model, Msg>,
    guard: Option<(GuardKind, GuardFn<Model>)>,
    route: Option<Prefix<Msg, Msg>>,
    /// Invariant violations detected eagerly on `self` (e.g. a guard-family
    /// conflict from combining `when`/`unless` on the same key), surfaced at
    /// [`RouterBuilder::build`] alongside the builder's own `errors`.
    errors: Vec<String>,
}

impl<Model: 'static, Msg: Send + 'static> KeyRule<Model, Msg> {
    pub fn new(
        predicate: impl Fn(&TermEvent) -> bool + Send + Sync + 'static,
        handler: impl Fn(&Model) -> UpdateResult<Model, Msg> + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(predicate),
            handler: HandlerSource::Direct(Arc::new(handler)),
            guard: None,
            route: None,
            errors: Vec::new(),
        }
    }

    /// Fires the action registered under `name` via [`RouterBuilder::action`]
    /// instead of an inline handler. Referencing a name no action was ever
    /// registered under is an [`crate::Error::Invariant`] at `build()`.
    pub fn named(predicate: impl Fn(&TermEvent) -> bool + Send + Sync + 'static, name: impl Into<String>) -> Self {
        Self {
            predicate: Arc::new(predicate),
            handler: HandlerSource::Named(name.into()),
            guard: None,
            route: None,
            errors: Vec::new(),
        }
    }

    /// Tags this registration's handler with a route prefix: if the handler's
    /// result carries a command, the command is wrapped via [`route`] before
    /// [`Router::dispatch`] returns it.
    pub fn route(mut self, prefix: Prefix<Msg, Msg>) -> Self {
        self.route = Some(prefix);
        self
    }

    pub fn when(mut self, guard: impl Fn(&Model) -> bool + Send + Sync + 'static) -> Self {
        self.set_guard(GuardKind::When, Arc::new(guard));
        self
    }

    pub fn only_if(self, guard: impl Fn(&Model) -> bool + Send + Sync + 'static) -> Self {
        self.when(guard)
    }

    pub fn unless(mut self, guard: impl Fn(&Model) -> bool + Send + Sync + 'static) -> Self {
        self.set_guard(GuardKind::Unless, Arc::new(guard));
        self
    }

    pub fn except_if(self, guard: impl Fn(&Model) -> bool + Send + Sync + 'static) -> Self {
        self.unless(guard)
    }

    /// Combining a `when`-family guard with an `unless`-family guard on the
    /// same key is an invariant violation, same as combining opposing
    /// families across a group and a per-key guard (see
    /// [`RouterBuilder::group`]). The conflicting call is a no-op beyond
    /// recording the error; the original guard is kept.
    fn set_guard(&mut self, kind: GuardKind, guard: GuardFn<Model>) {
        match self.guard.take() {
            Some((existing_kind, existing)) if existing_kind != kind => {
                self.errors
                    .push("a when-family guard and an unless-family guard were combined on the same key".to_string());
                self.guard = Some((existing_kind, existing));
            }
            Some((existing_kind, _existing)) => {
                self.guard = Some((existing_kind, guard));
            }
            None => {
                self.guard = Some((kind, guard));
            }
        }
    }
}

/// A [`KeyRule`] whose handler has been resolved to a concrete function,
/// produced by [`RouterBuilder::build`].
struct ResolvedKeyRule<Model, Msg> {
    predicate: Arc<dyn Fn(&TermEvent) -> bool + Send + Sync>,
    handler: Handler<Model, Msg>,
    guard: Option<(GuardKind, GuardFn<Model>)>,
    route: Option<Prefix<Msg, Msg>>,
}

impl<Model, Msg> ResolvedKeyRule<Model, Msg> {
    fn matches(&self, event: &TermEvent, model: &Model) -> bool {
        (self.predicate)(event) && self.guard_passes(model)
    }

    fn guard_passes(&self, model: &Model) -> bool {
        match &self.guard {
            None => true,
            Some((GuardKind::When, guard)) => guard(model),
            Some((GuardKind::Unless, guard)) => !guard(model),
        }
    }
}

/// Wraps a handler's result's command (if any) through `route`, leaving a
/// model-only result untouched. Used by [`Router::dispatch`] when a matched
/// key's registration carries a [`KeyRule::route`] prefix.
fn wrap_result_with_route<Model, Msg>(result: UpdateResult<Model, Msg>, prefix: &Prefix<Msg, Msg>) -> UpdateResult<Model, Msg>
where
    Msg: Send + 'static,
{
    match result {
        UpdateResult::Full(model, command) => UpdateResult::Full(model, command.map(|c| route(c, prefix))),
        UpdateResult::CommandOnly(command) => UpdateResult::CommandOnly(command.map(|c| route(c, prefix))),
        UpdateResult::ModelOnly(model) => UpdateResult::ModelOnly(model),
    }
}

trait ErasedRoute<Model, Msg>: Send + Sync {
    fn try_delegate(&self, message: Msg, model: &Model) -> std::result::Result<(Model, Option<Command<Msg>>), Msg>;
}

struct RouteEntry<Model, Msg, ChildModel, ChildMsg> {
    prefix: Prefix<Msg, ChildMsg>,
    get_child: Arc<dyn Fn(&Model) -> ChildModel + Send + Sync>,
    set_child: Arc<dyn Fn(&Model, ChildModel) -> Model + Send + Sync>,
    child_update: Arc<dyn Fn(ChildMsg, &ChildModel) -> UpdateResult<ChildModel, ChildMsg> + Send + Sync>,
}

impl<Model, Msg, ChildModel, ChildMsg> ErasedRoute<Model, Msg> for RouteEntry<Model, Msg, ChildModel, ChildMsg>
where
    Model: Send + 'static,
    Msg: Send + 'static,
    ChildModel: Clone + Send + 'static,
    ChildMsg: Send + 'static,
{
    fn try_delegate(&self, message: Msg, model: &Model) -> std::result::Result<(Model, Option<Command<Msg>>), Msg> {
        match (self.prefix.unwrap)(message) {
            Ok(child_message) => {
                let child_model = (self.get_child)(model);
                let (new_child, command) = (self.child_update)(child_message, &child_model).normalize(&child_model);
                let new_model = (self.set_child)(model, new_child);
                Ok((new_model, command.map(|c| route(c, &self.prefix))))
            }
            Err(original) => Err(original),
        }
    }
}

/// Builds a [`Router`]. Registration order doesn't matter for routes
/// (`Router::dispatch` tries all of them), but keymap entries are tried in
/// the order they were registered, first match wins.
pub struct RouterBuilder<Model, Msg> {
    event_extractor: Arc<dyn Fn(Msg) -> std::result::Result<TermEvent, Msg> + Send + Sync>,
    routes: Vec<Box<dyn ErasedRoute<Model, Msg>>>,
    keys: Vec<KeyRule<Model, Msg>>,
    actions: HashMap<String, Handler<Model, Msg>>,
    click: Option<Handler<Model, Msg>>,
    scroll_up: Option<Handler<Model, Msg>>,
    scroll_down: Option<Handler<Model, Msg>>,
    errors: Vec<String>,
}

impl<Model, Msg> RouterBuilder<Model, Msg>
where
    Model: Clone + Send + 'static,
    Msg: Send + 'static,
{
    /// `event_extractor` recovers a [`TermEvent`] from a parent message
    /// (returning the message back, unchanged, when it isn't one) — the
    /// typed stand-in for "this message is a first-class input event".
    pub fn new(event_extractor: impl Fn(Msg) -> std::result::Result<TermEvent, Msg> + Send + Sync + 'static) -> Self {
        Self {
            event_extractor: Arc::new(event_extractor),
            routes: Vec::new(),
            keys: Vec::new(),
            actions: HashMap::new(),
            click: None,
            scroll_up: None,
            scroll_down: None,
            errors: Vec::new(),
        }
    }

    /// Registers one child bag: `get_child`/`set_child` are a lens from the
    /// parent model onto the child's, and `child_update` is the child's own
    /// update function.
    pub fn route<ChildModel, ChildMsg>(
        mut self,
        prefix: Prefix<Msg, ChildMsg>,
        get_child: impl Fn(&Model) -> ChildModel + Send + Sync + 'static,
        set_child: impl Fn(&Model, ChildModel) -> Model + Send + Sync + 'static,
        child_update: impl Fn(ChildMsg, &ChildModel) -> UpdateResult<ChildModel, ChildMsg> + Send + Sync + 'static,
    ) -> Self
    where
        ChildModel: Clone + Send + 'static,
        ChildMsg: Send + 'static,
    {
        self.routes.push(Box::new(RouteEntry {
            prefix,
            get_child: Arc::new(get_child),
            set_child: Arc::new(set_child),
            child_update: Arc::new(child_update),
        }));
        self
    }

    pub fn keymap(mut self, rule: KeyRule<Model, Msg>) -> Self {
        self.keys.push(rule);
        self
    }

    /// Names `handler` so it can be referenced by [`KeyRule::named`] from one
    /// or more keymap registrations instead of being duplicated inline.
    pub fn action(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&Model) -> UpdateResult<Model, Msg> + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Arc::new(handler));
        self
    }

    /// Applies one guard to every rule produced by `rules`. Combining this
    /// group's guard family (`when`/`only_if` vs. `unless`/`except_if`) with
    /// a different family already set on one of the rules is an
    /// [`Error::Invariant`], reported at [`RouterBuilder::build`].
    pub fn group_when(self, guard: impl Fn(&Model) -> bool + Send + Sync + 'static, rules: Vec<KeyRule<Model, Msg>>) -> Self {
        self.group(GuardKind::When, guard, rules)
    }

    pub fn group_unless(self, guard: impl Fn(&Model) -> bool + Send + Sync + 'static, rules: Vec<KeyRule<Model, Msg>>) -> Self {
        self.group(GuardKind::Unless, guard, rules)
    }

    fn group(mut self, kind: GuardKind, guard: impl Fn(&Model) -> bool + Send + Sync + 'static, rules: Vec<KeyRule<Model, Msg>>) -> Self {
        let guard: GuardFn<Model> = Arc::new(guard);
        for mut rule in rules {
            match rule.guard.take() {
                Some((existing_kind, existing)) if existing_kind != kind => {
                    self.errors
                        .push("a group guard and a per-key guard from opposing families were combined".to_string());
                    rule.guard = Some((existing_kind, existing));
                }
                Some((existing_kind, existing)) => {
                    let group_guard = guard.clone();
                    rule.guard = Some((
                        existing_kind,
                        Arc::new(move |model: &Model| existing(model) && group_guard(model)),
                    ));
                }
                None => {
                    rule.guard = Some((kind, guard.clone()));
                }
            }
            self.keys.push(rule);
        }
        self
    }

    pub fn mousemap_click(mut self, handler: impl Fn(&Model) -> UpdateResult<Model, Msg> + Send + Sync + 'static) -> Self {
        self.click = Some(Arc::new(handler));
        self
    }

    pub fn mousemap_scroll_up(mut self, handler: impl Fn(&Model) -> UpdateResult<Model, Msg> + Send + Sync + 'static) -> Self {
        self.scroll_up = Some(Arc::new(handler));
        self
    }

    pub fn mousemap_scroll_down(mut self, handler: impl Fn(&Model) -> UpdateResult<Model, Msg> + Send + Sync + 'static) -> Self {
        self.scroll_down = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Router<Model, Msg>> {
        let mut errors = self.errors;
        let mut keys = Vec::with_capacity(self.keys.len());
        for rule in self.keys {
            errors.extend(rule.errors);
            let handler = match rule.handler {
                HandlerSource::Direct(handler) => handler,
                HandlerSource::Named(name) => match self.actions.get(&name) {
                    Some(handler) => handler.clone(),
                    None => {
                        errors.push(format!("keymap references unknown action \"{name}\""));
                        continue;
                    }
                },
            };
            keys.push(ResolvedKeyRule {
                predicate: rule.predicate,
                handler,
                guard: rule.guard,
                route: rule.route,
            });
        }

        if !errors.is_empty() {
            return Err(Error::Invariant(errors.join("; ")));
        }
        Ok(Router {
            event_extractor: self.event_extractor,
            routes: self.routes,
            keys,
            click: self.click,
            scroll_up: self.scroll_up,
            scroll_down: self.scroll_down,
        })
    }
}

/// The immutable table produced by [`RouterBuilder::build`], consulted by
/// [`Router::dispatch`] to synthesize an `update` function. Route dispatch
/// always precedes key/mouse dispatch, so a modal dialog that guards off its
/// own keymap still receives the results of commands it dispatched earlier.
pub struct Router<Model, Msg> {
    event_extractor: Arc<dyn Fn(Msg) -> std::result::Result<TermEvent, Msg> + Send + Sync>,
    routes: Vec<Box<dyn ErasedRoute<Model, Msg>>>,
    keys: Vec<ResolvedKeyRule<Model, Msg>>,
    click: Option<Handler<Model, Msg>>,
    scroll_up: Option<Handler<Model, Msg>>,
    scroll_down: Option<Handler<Model, Msg>>,
}

impl<Model, Msg> Router<Model, Msg>
where
    Model: Clone + Send + 'static,
    Msg: Send + 'static,
{
    pub fn dispatch(&self, message: Msg, model: &Model) -> UpdateResult<Model, Msg> {
        let mut message = message;
        for route in &self.routes {
            match route.try_delegate(message, model) {
                Ok((new_model, command)) => return UpdateResult::Full(new_model, command),
                Err(original) => message = original,
            }
        }

        let event = match (self.event_extractor)(message) {
            Ok(event) => event,
            Err(_not_an_event) => return UpdateResult::none(),
        };

        if event.is_key() {
            for rule in &self.keys {
                if rule.matches(&event, model) {
                    let result = (rule.handler)(model);
                    return match &rule.route {
                        Some(prefix) => wrap_result_with_route(result, prefix),
                        None => result,
                    };
                }
            }
        } else if event.is_mouse() {
            let handler = if event.is_scroll_up() {
                self.scroll_up.as_ref()
            } else if event.is_scroll_down() {
                self.scroll_down.as_ref()
            } else if event.is_click() {
                self.click.as_ref()
            } else {
                None
            };
            if let Some(handler) = handler {
                return handler(model);
            }
        }

        UpdateResult::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Debug)]
    struct Counter(i32);

    enum CounterMsg {
        Increment,
    }

    fn counter_update(msg: CounterMsg, model: &Counter) -> UpdateResult<Counter, CounterMsg> {
        match msg {
            CounterMsg::Increment => UpdateResult::model(Counter(model.0 + 1)),
        }
    }

    enum ParentMsg {
        Child(CounterMsg),
    }

    fn prefix() -> Prefix<ParentMsg, CounterMsg> {
        Prefix::new(ParentMsg::Child, |m: ParentMsg| match m {
            ParentMsg::Child(inner) => Ok(inner),
        })
    }

    #[test]
    fn delegate_invokes_child_update_with_the_unwrapped_message() {
        let prefix = prefix();
        let child_model = Counter(0);
        let (new_model, command) = delegate(
            ParentMsg::Child(CounterMsg::Increment),
            &prefix,
            counter_update,
            &child_model,
        )
        .expect("message was for this child");
        assert_eq!(new_model, Counter(1));
        assert!(command.is_none());
    }

    #[test]
    fn group_guard_conflicting_with_a_per_key_guard_is_an_invariant() {
        let builder: RouterBuilder<Counter, ParentMsg> = RouterBuilder::new(|_m| unreachable!());
        let builder = builder.group_when(
            |_model: &Counter| true,
            vec![KeyRule::new(|_e| true, |model: &Counter| UpdateResult::model(model.clone())).unless(|_model: &Counter| false)],
        );
        assert!(builder.build().is_err());
    }

    enum InputMsg {
        Input(TermEvent),
    }

    fn key(c: char) -> TermEvent {
        TermEvent(crossterm::event::Event::Key(crossterm::event::KeyEvent::new(
            crossterm::event::KeyCode::Char(c),
            crossterm::event::KeyModifiers::NONE,
        )))
    }

    #[test]
    fn a_keymap_can_fire_a_named_action() {
        let router: RouterBuilder<Counter, InputMsg> = RouterBuilder::new(|m: InputMsg| match m {
            InputMsg::Input(event) => Ok(event),
        })
        .action("increment", |model: &Counter| UpdateResult::model(Counter(model.0 + 1)))
        .keymap(KeyRule::named(|e: &TermEvent| e.is_char('i'), "increment"))
        .build()
        .expect("the action is registered before it is referenced");

        match router.dispatch(InputMsg::Input(key('i')), &Counter(0)) {
            UpdateResult::ModelOnly(model) => assert_eq!(model, Counter(1)),
            _ => panic!("expected the named action to fire"),
        }
    }

    #[test]
    fn referencing_an_unregistered_action_is_an_invariant() {
        let builder: RouterBuilder<Counter, InputMsg> = RouterBuilder::new(|m: InputMsg| match m {
            InputMsg::Input(event) => Ok(event),
        });
        let builder = builder.keymap(KeyRule::named(|e: &TermEvent| e.is_char('i'), "nonexistent"));
        assert!(builder.build().is_err());
    }

    #[test]
    fn combining_when_and_unless_on_the_same_key_is_an_invariant() {
        let builder: RouterBuilder<Counter, ParentMsg> = RouterBuilder::new(|_m| unreachable!());
        let rule = KeyRule::new(|_e| true, |model: &Counter| UpdateResult::model(model.clone()))
            .when(|_model: &Counter| true)
            .unless(|_model: &Counter| false);
        let builder = builder.keymap(rule);
        assert!(builder.build().is_err());
    }

    #[derive(Debug)]
    enum RoutedMsg {
        Input(TermEvent),
        Raw(i32),
        Tagged(i32),
    }

    struct CollectingSink(Arc<std::sync::Mutex<Vec<RoutedMsg>>>);

    impl crate::outlet::Sink<RoutedMsg> for CollectingSink {
        fn send(&self, message: RoutedMsg) {
            self.0.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn a_keymap_route_prefix_wraps_the_handlers_command() {
        let prefix: Prefix<RoutedMsg, RoutedMsg> = Prefix::new(
            |m: RoutedMsg| match m {
                RoutedMsg::Raw(n) => RoutedMsg::Tagged(n),
                other => other,
            },
            |m: RoutedMsg| Ok(m),
        );

        let router: RouterBuilder<Counter, RoutedMsg> = RouterBuilder::new(|m: RoutedMsg| match m {
            RoutedMsg::Input(event) => Ok(event),
            other => Err(other),
        })
        .keymap(
            KeyRule::new(
                |e: &TermEvent| e.is_char('x'),
                |_model: &Counter| {
                    UpdateResult::command(Command::custom(|outlet, _token| {
                        Box::pin(async move {
                            outlet.put(RoutedMsg::Raw(5));
                        })
                    }))
                },
            )
            .route(prefix),
        )
        .build()
        .expect("no invariants are violated");

        let result = router.dispatch(RoutedMsg::Input(key('x')), &Counter(0));
        let command = match result {
            UpdateResult::CommandOnly(Some(command)) => command,
            _ => panic!("expected the handler's command to survive routing"),
        };

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink: Arc<dyn crate::outlet::Sink<RoutedMsg>> = Arc::new(CollectingSink(received.clone()));
        if let Some(worker) = crate::dispatch::dispatch(command, sink, crate::dispatch::DispatchCtx::new()).await {
            worker.await.unwrap();
        }

        match received.lock().unwrap().as_slice() {
            [RoutedMsg::Tagged(5)] => {}
            other => panic!("expected a single Tagged(5), got {other:?}"),
        }
    }
}
