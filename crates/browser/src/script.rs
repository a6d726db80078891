//! The in-page snapshot producer.
//!
//! Kept as a literal source string: the script runs inside the page, so its
//! identifiers must survive any build step untouched. It walks the document
//! (including open shadow roots), keeps interactive elements near the
//! viewport, assigns stable uids through the `data-edith-uid` marker
//! attribute, and returns the snapshot as a JSON string. A top-level
//! try/catch turns any in-page failure into an empty-elements snapshot with
//! a `Snapshot error:` sentinel instead of a rejected evaluation.
//!
//! Password and hidden inputs are dropped at the source: neither their
//! values nor their existence may appear in the output.

pub const SNAPSHOT_JS: &str = r##"
(() => {
  try {
    const vw = window.innerWidth || 1280;
    const vh = window.innerHeight || 900;

    const CLICK_TAGS = ['a', 'button', 'input', 'select', 'textarea', 'label'];
    const ACTION_ROLES = [
      'button', 'link', 'tab', 'menuitem', 'menuitemcheckbox', 'menuitemradio',
      'option', 'checkbox', 'radio', 'combobox', 'searchbox', 'textbox',
      'slider', 'switch', 'spinbutton', 'listbox', 'treeitem'
    ];
    const NOISE_ROLES = [
      'presentation', 'none', 'img', 'list', 'listitem', 'row', 'group',
      'region', 'figure', 'separator', 'note', 'status', 'log', 'timer',
      'tooltip', 'generic'
    ];
    const LANDMARK_TAGS = ['nav', 'header', 'footer', 'aside', 'main', 'form', 'section'];
    const LANDMARK_ROLES = ['navigation', 'banner', 'search', 'form', 'dialog', 'menu', 'contentinfo'];

    const nearViewport = (r) =>
      r.top < vh * 3 && r.bottom > -vh && r.left < vw + 100 && r.right > -100;

    const collect = (root, out) => {
      const walker = root.querySelectorAll ? root.querySelectorAll('*') : [];
      for (const el of walker) {
        out.push(el);
        if (el.shadowRoot) collect(el.shadowRoot, out);
      }
    };

    const all = [];
    collect(document, all);

    let nextUid = 1;
    for (const el of all) {
      const existing = parseInt(el.getAttribute && el.getAttribute('data-edith-uid'), 10);
      if (!isNaN(existing) && existing >= nextUid) nextUid = existing + 1;
    }

    const attr = (el, name) => (el.getAttribute && el.getAttribute(name)) || '';
    const inputType = (el) => (typeof el.type === 'string' ? el.type.toLowerCase() : '');

    const isVisible = (el, r) => {
      if (r.width === 0 || r.height === 0) return false;
      const style = window.getComputedStyle(el);
      if (style.display === 'none' || style.visibility === 'hidden') return false;
      if (parseFloat(style.opacity) === 0) return false;
      return true;
    };

    const classify = (el, tag, role) => {
      if (CLICK_TAGS.includes(tag)) return true;
      if (tag === 'video') return true;
      if (el.onclick || el.hasAttribute('onclick')) return true;
      if (role && ACTION_ROLES.includes(role)) return true;
      if (el.isContentEditable) return true;
      if (el.hasAttribute('tabindex') && !['div', 'span', 'li'].includes(tag)) return true;
      return false;
    };

    const labelForText = (el) => {
      if (!el.id) return '';
      const label = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
      return label ? (label.innerText || '').trim() : '';
    };

    const squash = (s) => (s || '').replace(/\s+/g, ' ').trim();

    const accessibleName = (el, tag) => {
      let name =
        attr(el, 'aria-label') ||
        attr(el, 'title') ||
        (typeof el.placeholder === 'string' ? el.placeholder : '') ||
        squash(el.innerText).slice(0, 120) ||
        attr(el, 'alt') ||
        (typeof el.name === 'string' ? el.name : '');
      if (!name) {
        const img = el.querySelector && el.querySelector('img[alt]');
        if (img) name = attr(img, 'alt');
      }
      if (tag === 'select' && el.options && el.selectedIndex >= 0) {
        const selected = el.options[el.selectedIndex];
        if (selected) name = name + ' (selected: "' + squash(selected.text).slice(0, 60) + '")';
      }
      if (tag === 'input' && (inputType(el) === 'checkbox' || inputType(el) === 'radio')) {
        const assoc = labelForText(el);
        if (assoc) name = name ? name + ' ' + assoc : assoc;
      }
      return squash(name).slice(0, 160);
    };

    const contextOf = (el) => {
      let cur = el.parentElement || (el.getRootNode && el.getRootNode().host) || null;
      let depth = 0;
      while (cur && depth < 5) {
        const al = attr(cur, 'aria-label');
        if (al) return squash(al).slice(0, 50);
        const tag = cur.tagName ? cur.tagName.toLowerCase() : '';
        const role = attr(cur, 'role');
        if (LANDMARK_TAGS.includes(tag) || LANDMARK_ROLES.includes(role)) {
          const heading = cur.querySelector && cur.querySelector('h1, h2, h3, h4, h5, h6, legend');
          if (heading && heading.innerText) return squash(heading.innerText).slice(0, 50);
          return role || tag;
        }
        cur = cur.parentElement || (cur.getRootNode && cur.getRootNode().host) || null;
        depth++;
      }
      return '';
    };

    const kept = [];
    for (const el of all) {
      if (!el.tagName) continue;
      const tag = el.tagName.toLowerCase();
      if (['script', 'style', 'noscript', 'meta', 'link', 'head'].includes(tag)) continue;

      const rect = el.getBoundingClientRect();
      if (!isVisible(el, rect) || !nearViewport(rect)) continue;

      const role = attr(el, 'role').toLowerCase();
      if (!classify(el, tag, role)) continue;
      if (role && NOISE_ROLES.includes(role) && !CLICK_TAGS.includes(tag) &&
          !el.onclick && !el.hasAttribute('onclick') && !el.isContentEditable && tag !== 'video') {
        continue;
      }

      if (tag === 'input') {
        const t = inputType(el);
        if (t === 'password' || t === 'hidden') continue;
      }

      const isInput = tag === 'input' || tag === 'textarea' || el.isContentEditable ||
        ['textbox', 'searchbox', 'combobox'].includes(role);
      const isSelect = tag === 'select';
      const isVideo = tag === 'video';

      const name = accessibleName(el, tag);
      if (!name && !isInput && !isSelect && !isVideo) continue;

      kept.push({ el, tag, role, rect, name, isInput, isSelect, isVideo });
    }

    // Nested clickables collapse to the innermost one; a <label> wrapping
    // its input stays.
    const clickish = (k) =>
      k.tag === 'a' || k.tag === 'button' || k.role === 'link' || k.role === 'button';
    const deduped = kept.filter((k) => {
      if (!clickish(k) || k.tag === 'label') return true;
      return !kept.some((other) => other !== k && clickish(other) && k.el.contains(other.el));
    });

    const elements = [];
    for (const k of deduped) {
      const el = k.el;
      let uid = parseInt(el.getAttribute('data-edith-uid'), 10);
      if (isNaN(uid)) {
        uid = nextUid++;
        el.setAttribute('data-edith-uid', String(uid));
      }

      const item = {
        uid: uid,
        tag: k.tag,
        role: k.role || k.tag,
        name: k.name.slice(0, 120),
        context: contextOf(el),
        x: Math.round(k.rect.left),
        y: Math.round(k.rect.top),
        width: Math.round(k.rect.width),
        height: Math.round(k.rect.height),
        isClickable: clickish(k) || CLICK_TAGS.includes(k.tag) ||
          !!el.onclick || el.hasAttribute('onclick'),
        isInput: k.isInput,
        isVideo: k.isVideo,
        isSelect: k.isSelect,
        disabled: el.disabled === true || attr(el, 'aria-disabled') === 'true'
      };

      const href = attr(el, 'href');
      if (href) item.href = href.slice(0, 300);
      const t = inputType(el);
      if (t) item.type = t;
      if (typeof el.value === 'string' && (k.tag === 'input' || k.tag === 'textarea' || k.tag === 'select')) {
        item.value = el.value.slice(0, 120);
      }
      if (typeof el.placeholder === 'string' && el.placeholder) {
        item.placeholder = el.placeholder.slice(0, 120);
      }

      const ariaChecked = attr(el, 'aria-checked');
      if (ariaChecked === 'true' || ariaChecked === 'false') {
        item.checked = ariaChecked === 'true';
      } else if (typeof el.checked === 'boolean' && (t === 'checkbox' || t === 'radio')) {
        item.checked = el.checked;
      }

      const expanded = attr(el, 'aria-expanded');
      if (expanded === 'true' || expanded === 'false') {
        item.ariaExpanded = expanded === 'true';
      }

      if (k.isSelect && el.options) {
        const options = [];
        for (let i = 0; i < el.options.length && i < 30; i++) {
          const opt = el.options[i];
          options.push({
            value: String(opt.value).slice(0, 60),
            text: squash(opt.text).slice(0, 60),
            selected: opt.selected === true
          });
        }
        item.options = options;
      }

      elements.push(item);
    }

    const rawText = ((document.body && document.body.innerText) || '').slice(0, 5000);

    return JSON.stringify({
      url: location.href,
      title: document.title || '',
      elements: elements,
      rawText: rawText
    });
  } catch (e) {
    return JSON.stringify({
      url: (typeof location !== 'undefined' && location.href) || '',
      title: (typeof document !== 'undefined' && document.title) || '',
      elements: [],
      rawText: 'Snapshot error: ' + (e && e.message ? e.message : String(e))
    });
  }
})()
"##;
